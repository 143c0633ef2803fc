macro_rules! invariant_violated {
    ($($arg:tt)*) => {
        $crate::error::RaftError::InvariantViolated(format!($($arg)*))
    };
}

macro_rules! check_invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(invariant_violated!($($arg)*));
        }
    };
}
