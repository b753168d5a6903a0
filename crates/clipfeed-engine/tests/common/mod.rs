#![allow(dead_code)]

/// Re-check `$cond` every 10 ms until it holds, panicking once `$limit`
/// has passed.  Under `start_paused` the clock is virtual, so waits cost
/// nothing.  `$cond` may contain `.await`.
macro_rules! eventually {
    ($limit:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + $limit;
        loop {
            if $cond {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for `{}`", stringify!($cond));
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

pub mod fake_backend;
pub mod fake_store;
