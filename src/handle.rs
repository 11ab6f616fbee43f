//! Single-owner wrappers for native handles.

/// A native resource that must be released exactly once.
pub trait Close {
    fn close(&mut self);
}

/// Owns a boxed native handle and closes it exactly once: on an explicit
/// [`Owned::close`], or when dropped.
pub struct Owned<T: ?Sized + Close> {
    inner: Option<Box<T>>,
    label: &'static str,
}

impl<T: ?Sized + Close> Owned<T> {
    pub fn new(inner: Box<T>, label: &'static str) -> Self {
        Self {
            inner: Some(inner),
            label,
        }
    }

    /// Close now. A panicking `close` is contained and logged.
    pub fn close(mut self) {
        self.release();
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    fn release(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        let label = self.label;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            inner.close();
        }));
        if result.is_err() {
            log::error!("closing {} panicked; handle released anyway", label);
        }
    }
}

impl<T: ?Sized + Close> std::ops::Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `inner` is only None inside `release`, which consumes or drops self.
        match self.inner.as_deref() {
            Some(inner) => inner,
            None => unreachable!("{} used after close", self.label),
        }
    }
}

impl<T: ?Sized + Close> std::ops::DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.inner.as_deref_mut() {
            Some(inner) => inner,
            None => unreachable!("handle used after close"),
        }
    }
}

impl<T: ?Sized + Close> Drop for Owned<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized + Close> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owned")
            .field("label", &self.label)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);

    impl Close for Counted {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn explicit_close_releases_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle: Owned<dyn Close> = Owned::new(Box::new(Counted(closes.clone())), "counted");
        handle.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _handle = Owned::new(Box::new(Counted(closes.clone())), "counted");
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_close_is_contained() {
        struct Explodes;
        impl Close for Explodes {
            fn close(&mut self) {
                panic!("close failed");
            }
        }
        Owned::new(Box::new(Explodes), "explodes").close();
    }
}
