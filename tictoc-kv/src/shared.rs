use std::ptr::NonNull;

/// A non-null pointer to a heap-allocated shared object.
///
/// The pointee is leaked on creation and reclaimed only through
/// [`into_box`]; holders coordinate reclamation externally (here, through
/// the timestamp cache's reference counts).
///
/// [`into_box`]: #method.into_box
pub(crate) struct Shared<T>(NonNull<T>);

impl<T> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Shared").field(&self.0).finish()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<T> {}

unsafe impl<T: Sync + Send> Send for Shared<T> {}
unsafe impl<T: Sync + Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Box::leak(Box::new(value)).into())
    }

    pub fn ptr_eq(self, other: Self) -> bool {
        self.0 == other.0
    }

    /// # Safety
    /// The pointee must still be alive, and the chosen lifetime must not
    /// outlive it.
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        self.0.as_ref()
    }

    /// # Safety
    /// No other reference to the pointee may exist.
    pub unsafe fn into_box(self) -> Box<T> {
        Box::from_raw(self.0.as_ptr())
    }
}
