/// Emit a `tracing` event at the given level when the "tracing" feature is
/// enabled; expands to nothing otherwise.
///
/// ```ignore
/// heap_trace!(debug, bytes = n, "extended heap");
/// ```
macro_rules! heap_trace {
    ( $level:ident, $( $args:tt )* ) => {
        #[cfg(feature = "tracing")]
        {
            tracing::$level!( $( $args )* );
        }
    };
}
