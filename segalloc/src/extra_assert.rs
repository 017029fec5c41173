#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert {
    ( $condition:expr $( , $args:expr )* ) => {
        assert!($condition $( , $args )* )
    }
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert {
    ( $condition:expr $( , $args:expr )* ) => {
        if false {
            let _ = $condition;
            $( let _ = $args; )*
        }
    }
}

#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $args:expr )* ) => {
        assert_eq!($left, $right $( , $args )* )
    }
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $args:expr )* ) => {
        if false {
            let _ = $left;
            let _ = $right;
            $( let _ = $args; )*
        }
    }
}

/// Run the full heap consistency check and panic on the first violation.
///
/// This walks the whole heap and every free list, so it is only compiled in
/// with the "extra_assertions" feature; otherwise it evaluates nothing.
#[cfg(feature = "extra_assertions")]
macro_rules! assert_heap_is_valid {
    ( $heap:expr ) => {
        if let Err(violation) = $heap.validate() {
            panic!("heap is corrupted: {}", violation);
        }
    };
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! assert_heap_is_valid {
    ( $heap:expr ) => {
        if false {
            let _ = &$heap;
        }
    };
}
