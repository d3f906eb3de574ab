#[cfg(feature = "debug")]
macro_rules! debug_trace {
    ($( $args:tt )*) => { tracing::trace!( $( $args )* ) }
}

#[cfg(not(feature = "debug"))]
macro_rules! debug_trace {
    ($( $args:tt )*) => {};
}
