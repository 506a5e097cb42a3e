pub(crate) mod constants;
pub(crate) mod spin_lock;
