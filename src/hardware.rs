pub mod asic;
pub mod cds;
pub mod i2c;
pub mod si5344;

use std::time::Duration;

/// Sleep used between hardware steps. Tests substitute a no-op.
pub type Delay = fn(Duration);

/// Blocks the calling thread.
pub fn thread_sleep(duration: Duration) {
    std::thread::sleep(duration)
}
