/// Anything that can be initialized with a `const` value.
pub(crate) trait ConstInit {
    /// The `const` default initializer value for `Self`.
    const INIT: Self;
}

// A lazily built value starts out absent.
impl<T> ConstInit for Option<T> {
    const INIT: Self = None;
}
