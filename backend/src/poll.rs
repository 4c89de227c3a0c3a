use std::fmt;
use std::os::unix::io::RawFd;

use common::err::PResult;

/// The host event loop as seen from a protocol module. Registration is
/// edge-triggered for read, write, error and hangup at once; `fake_hangup`
/// schedules a synthetic hangup event so teardown always happens from a
/// fresh callback instead of re-entering the current one.
pub trait Poller: fmt::Debug {
    fn register(&mut self, fd: RawFd) -> PResult<()>;

    fn deregister(&mut self, fd: RawFd);

    fn fake_hangup(&mut self, fd: RawFd);
}
