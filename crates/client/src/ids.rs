//! Rolling 16-bit id generator, shared between the header id and observer id
//! axes (zero reserved to mean "no id" on both, mirroring the hub side).

use std::sync::Mutex;

pub struct RollingId {
    next: Mutex<u16>,
}

impl RollingId {
    pub fn new() -> Self {
        Self { next: Mutex::new(1) }
    }

    pub fn next(&self) -> u16 {
        let mut guard = self.next.lock().unwrap();
        let id = *guard;
        *guard = guard.wrapping_add(1);
        if *guard == 0 {
            *guard = 1;
        }
        id
    }
}

impl Default for RollingId {
    fn default() -> Self {
        Self::new()
    }
}
