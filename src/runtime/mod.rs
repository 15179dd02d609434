//! Headless host runtime: console, simulated presentation surface and the
//! main-thread tick loop.

pub(crate) mod console;
pub(crate) mod headless_host;
pub(crate) mod host_loop;
pub(crate) mod media_probe;
