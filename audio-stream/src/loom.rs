#[cfg(loom)]
pub(crate) use loom::sync;
#[cfg(all(loom, test))]
pub(crate) use loom::thread;

#[cfg(not(loom))]
pub(crate) use ::std::sync;
