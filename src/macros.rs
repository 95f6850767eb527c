//! Logging macros
//!
//! Every macro tests [`Logger::enabled_at`](crate::Logger::enabled_at) with
//! its static call site before it touches its arguments. A disabled level
//! evaluates nothing, formats nothing and allocates nothing. Push failures are not returned; they show
//! up in the drop counter and the drop callback.

/// Emit a record rendered on the calling thread
///
/// ```
/// # let logger = shmlog::Logger::detached();
/// shmlog::log!(logger, shmlog::Level::Info, "connected to {}", "db-1");
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::Logger = &$logger;
        let level: $crate::Level = $level;
        static SITE: $crate::CallSite = $crate::CallSite::new(module_path!(), file!(), line!());
        if logger.enabled_at(level, &SITE) {
            let _ = logger.submit_formatted(level, &SITE, format_args!($($arg)+), false);
        }
    }};
}

/// Like [`log!`], stamped with the calling thread's identity
#[macro_export]
macro_rules! log_threaded {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::Logger = &$logger;
        let level: $crate::Level = $level;
        static SITE: $crate::CallSite = $crate::CallSite::new(module_path!(), file!(), line!());
        if logger.enabled_at(level, &SITE) {
            let _ = logger.submit_formatted(level, &SITE, format_args!($($arg)+), true);
        }
    }};
}

/// Emit a record whose message is rendered by the consumer
///
/// Arguments are captured by value as [`Arg`](crate::Arg)s and substituted
/// into the `{}` placeholders of the literal spec after filtering.
///
/// ```
/// # let logger = shmlog::Logger::detached();
/// let attempt = 3;
/// shmlog::log_deferred!(logger, shmlog::Level::Debug, "retry {} for {}", attempt, "job-9");
/// ```
#[macro_export]
macro_rules! log_deferred {
    ($logger:expr, $level:expr, $spec:literal $(, $arg:expr)* $(,)?) => {{
        let logger: &$crate::Logger = &$logger;
        let level: $crate::Level = $level;
        static SITE: $crate::CallSite = $crate::CallSite::new(module_path!(), file!(), line!());
        if logger.enabled_at(level, &SITE) {
            let _ = logger.submit_deferred(
                level,
                &SITE,
                $spec,
                ::std::vec![$($crate::Arg::from($arg)),*],
                false,
            );
        }
    }};
}

/// Deferred and threaded
#[macro_export]
macro_rules! log_deferred_threaded {
    ($logger:expr, $level:expr, $spec:literal $(, $arg:expr)* $(,)?) => {{
        let logger: &$crate::Logger = &$logger;
        let level: $crate::Level = $level;
        static SITE: $crate::CallSite = $crate::CallSite::new(module_path!(), file!(), line!());
        if logger.enabled_at(level, &SITE) {
            let _ = logger.submit_deferred(
                level,
                &SITE,
                $spec,
                ::std::vec![$($crate::Arg::from($arg)),*],
                true,
            );
        }
    }};
}

/// [`log!`] at [`Level::Trace`](crate::Level::Trace)
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Trace, $($arg)+)
    };
}

/// [`log!`] at [`Level::Debug`](crate::Level::Debug)
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Debug, $($arg)+)
    };
}

/// [`log!`] at [`Level::Detail`](crate::Level::Detail)
#[macro_export]
macro_rules! detail {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Detail, $($arg)+)
    };
}

/// [`log!`] at [`Level::Info`](crate::Level::Info)
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Info, $($arg)+)
    };
}

/// [`log!`] at [`Level::Notice`](crate::Level::Notice)
#[macro_export]
macro_rules! notice {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Notice, $($arg)+)
    };
}

/// [`log!`] at [`Level::Warning`](crate::Level::Warning)
#[macro_export]
macro_rules! warning {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Warning, $($arg)+)
    };
}

/// [`log!`] at [`Level::Error`](crate::Level::Error)
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Error, $($arg)+)
    };
}

/// [`log!`] at [`Level::Critical`](crate::Level::Critical)
#[macro_export]
macro_rules! critical {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Level::Critical, $($arg)+)
    };
}
