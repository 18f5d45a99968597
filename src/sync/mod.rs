//! Blocking synchronization primitives built on [`crate::parking`].

pub mod barrier;
pub mod exchanger;
pub mod latch;
pub mod mutex;
pub(crate) mod queue;

pub use self::barrier::{Barrier, CyclicBarrier, WaitResult};
pub use self::exchanger::Exchanger;
pub use self::latch::CountDownLatch;
pub use self::mutex::{ReentrantLock, ReentrantLockGuard, ReentrantMutex};
