//! Assertion macros shared by test helpers and integration tests.

/// Take the response written to a [`Reply`](crate::Reply) and panic with
/// contextual diagnostics if none was written.
#[macro_export]
macro_rules! reply_expect {
    ($reply:expr) => {{
        $reply
            .take()
            .expect(concat!("no response written at ", file!(), ":", line!()))
    }};
    ($reply:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $reply.take().expect(&m)
    }};
}

/// Await a receive future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! recv_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("recv failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

pub use crate::{recv_expect, reply_expect};
