// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kuzu_common::constants::THREAD_SLEEP_TIME_WHEN_WAITING_MICROS;

/// An owned pointer that supports concurrent one-shot initialization: the first thread to win
/// the race calls its factory while every other caller busy-spins until a value is published.
/// Once `get()` returns non-null it is stable for the rest of the object's life.
pub struct LockedPtr<T> {
    ptr: AtomicPtr<T>,
    mtx: Mutex<()>,
}

impl<T> LockedPtr<T> {
    pub fn new() -> Self {
        LockedPtr {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            mtx: Mutex::new(()),
        }
    }

    /// If it returns null, call `set` to initialize it. Once non-null, always non-null.
    pub fn get(&self) -> Option<&T> {
        let p = self.ptr.load(Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            // SAFETY: once published, the pointee is never mutated or freed while `self` lives.
            Some(unsafe { &*p })
        }
    }

    /// Thread-safe; only one caller's `factory` ever runs. Other callers block until it
    /// publishes. Returns `true` if this call performed the initialization.
    pub fn set(&self, factory: impl FnOnce() -> Box<T>) -> bool {
        match self.mtx.try_lock() {
            Ok(_guard) => {
                if self.ptr.load(Ordering::Acquire).is_null() {
                    let boxed = Box::into_raw(factory());
                    self.ptr.store(boxed, Ordering::Release);
                    return true;
                }
                false
            }
            Err(_) => {
                while self.ptr.load(Ordering::Acquire).is_null() {
                    std::thread::sleep(Duration::from_micros(
                        THREAD_SLEEP_TIME_WHEN_WAITING_MICROS,
                    ));
                }
                false
            }
        }
    }
}

impl<T> Default for LockedPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockedPtr<T> {
    fn drop(&mut self) {
        let p = *self.ptr.get_mut();
        if !p.is_null() {
            // SAFETY: `p` was produced by `Box::into_raw` in `set` and never freed since.
            drop(unsafe { Box::from_raw(p) });
        }
    }
}

// SAFETY: `LockedPtr<T>` only exposes shared access to `T` through `get`, and publication is
// synchronized by the mutex plus the acquire/release pair on `ptr`.
unsafe impl<T: Send + Sync> Send for LockedPtr<T> {}
unsafe impl<T: Send + Sync> Sync for LockedPtr<T> {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn set_runs_factory_exactly_once() {
        let locked = Arc::new(LockedPtr::<AtomicUsize>::new());
        let factory_calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let locked = locked.clone();
            let factory_calls = factory_calls.clone();
            handles.push(std::thread::spawn(move || {
                locked.set(|| {
                    factory_calls.fetch_add(1, Ordering::SeqCst);
                    Box::new(AtomicUsize::new(42))
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
        assert_eq!(locked.get().unwrap().load(Ordering::SeqCst), 42);
    }
}
