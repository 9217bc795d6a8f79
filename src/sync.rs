cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{AtomicU8, Ordering};
        pub(crate) use loom::sync::{Arc, Mutex};
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{AtomicU8, Ordering};
        pub(crate) use shuttle::sync::{Arc, Mutex};
    } else {
        pub(crate) use std::sync::atomic::{AtomicU8, Ordering};
        pub(crate) use std::sync::{Arc, Mutex};
    }
}
