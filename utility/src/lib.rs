mod bounded_pool;
mod heap;
mod priority_queue;
mod sparse_map;
mod sparse_set;

pub use bounded_pool::BoundedPool;
pub use heap::{sift_down, sift_up};
pub use priority_queue::PriorityQueue;
pub use sparse_map::SparseMap;
pub use sparse_set::SparseSet;
