//! "Meaningful value" predicate
//!
//! Every merge rule in the workspace asks the same question before letting a
//! value win: does it carry information? Text must be non-empty after
//! trimming, numbers must be finite and non-zero, lists must hold at least one
//! meaningful item. `None` is never meaningful.

/// Values that can be tested for carrying usable information
pub trait Meaningful {
    fn is_meaningful(&self) -> bool;
}

impl Meaningful for str {
    fn is_meaningful(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Meaningful for String {
    fn is_meaningful(&self) -> bool {
        self.as_str().is_meaningful()
    }
}

impl Meaningful for f64 {
    fn is_meaningful(&self) -> bool {
        self.is_finite() && *self != 0.0
    }
}

impl Meaningful for i64 {
    fn is_meaningful(&self) -> bool {
        *self != 0
    }
}

impl<T: Meaningful> Meaningful for Vec<T> {
    fn is_meaningful(&self) -> bool {
        self.iter().any(Meaningful::is_meaningful)
    }
}

impl<T: Meaningful + ?Sized> Meaningful for &T {
    fn is_meaningful(&self) -> bool {
        (**self).is_meaningful()
    }
}

impl<T: Meaningful> Meaningful for Option<T> {
    fn is_meaningful(&self) -> bool {
        self.as_ref().is_some_and(Meaningful::is_meaningful)
    }
}
