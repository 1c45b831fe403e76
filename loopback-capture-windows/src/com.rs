//! Per-thread COM apartment membership.
//!
//! Every thread that touches an endpoint (the controller's callers for
//! enumeration and negotiation, the poll thread for streaming) joins the
//! multithreaded apartment once and leaves it when the thread exits.

use std::cell::OnceCell;

use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::WasapiError;

struct Apartment {
    // False when the thread was already in a single-threaded apartment.
    owned: bool,
}

impl Drop for Apartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

thread_local! {
    static APARTMENT: OnceCell<Apartment> = const { OnceCell::new() };
}

/// Join the MTA on the calling thread, once per thread.
pub(crate) fn ensure_mta() -> Result<(), WasapiError> {
    APARTMENT.with(|cell| {
        if cell.get().is_some() {
            return Ok(());
        }
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        let owned = if hr.is_ok() {
            true
        } else if hr == RPC_E_CHANGED_MODE {
            log::warn!("thread already joined a single-threaded COM apartment; using it as is");
            false
        } else {
            return Err(WasapiError::Call {
                call: "CoInitializeEx",
                source: hr.into(),
            });
        };
        let _ = cell.set(Apartment { owned });
        Ok(())
    })
}
