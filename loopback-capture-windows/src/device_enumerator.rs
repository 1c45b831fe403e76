//! Windows endpoint enumeration via the MMDevice API.
//!
//! Render endpoints back `PlaybackLoopback`, capture endpoints back
//! `DirectInput`. Interfaces are created per call on the calling thread,
//! so the provider itself holds no COM state and is freely shareable.

use windows::core::PCWSTR;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::E_NOTFOUND;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IAudioClient, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM_READ};
use windows::Win32::System::Variant::VT_LPWSTR;

use loopback_capture_core::{AudioEndpoint, CaptureError, DeviceDescriptor, Endpoint, EndpointKind, EndpointProvider};

use crate::com;
use crate::error::{CallContext, WasapiError};
use crate::wasapi_endpoint::WasapiEndpoint;

/// [`EndpointProvider`] backed by `IMMDeviceEnumerator`.
#[derive(Debug, Default)]
pub struct WasapiProvider {
    _private: (),
}

impl WasapiProvider {
    /// Check that COM and the MMDevice API are usable on this thread.
    pub fn new() -> Result<Self, CaptureError> {
        enumerator()?;
        Ok(Self { _private: () })
    }
}

fn data_flow(kind: EndpointKind) -> EDataFlow {
    match kind {
        EndpointKind::PlaybackLoopback => eRender,
        EndpointKind::DirectInput => eCapture,
    }
}

fn enumerator() -> Result<IMMDeviceEnumerator, WasapiError> {
    com::ensure_mta()?;
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }.call("CoCreateInstance(MMDeviceEnumerator)")
}

fn device_id(device: &IMMDevice) -> Result<String, WasapiError> {
    unsafe {
        let id = device.GetId().call("IMMDevice::GetId")?;
        let text = id.to_string().unwrap_or_default();
        CoTaskMemFree(Some(id.0 as *const _));
        Ok(text)
    }
}

/// Read `PKEY_Device_FriendlyName`; `None` when missing or unreadable.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let mut value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;

        let name = if value.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = value.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                None
            } else {
                pwsz.to_string().ok()
            }
        } else {
            None
        };

        PropVariantClear(&mut value).ok();
        name
    }
}

impl EndpointProvider for WasapiProvider {
    fn enumerate(&self, kind: EndpointKind) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let enumerator = enumerator()?;
        unsafe {
            let collection = enumerator
                .EnumAudioEndpoints(data_flow(kind), DEVICE_STATE_ACTIVE)
                .call("EnumAudioEndpoints")?;
            let count = collection.GetCount().call("IMMDeviceCollection::GetCount")?;

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(e) => {
                        log::debug!("skipping {} endpoint {}: {}", kind, i, e);
                        continue;
                    }
                };
                let id = match device_id(&device) {
                    Ok(id) if !id.is_empty() => id,
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("skipping {} endpoint {}: {}", kind, i, e);
                        continue;
                    }
                };
                devices.push(DeviceDescriptor {
                    id,
                    name: friendly_name(&device),
                    is_active: true,
                });
            }
            Ok(devices)
        }
    }

    fn default_device_id(&self, kind: EndpointKind) -> Result<Option<String>, CaptureError> {
        let enumerator = enumerator()?;
        match unsafe { enumerator.GetDefaultAudioEndpoint(data_flow(kind), eConsole) } {
            Ok(device) => Ok(Some(device_id(&device)?)),
            Err(e) if e.code() == E_NOTFOUND => Ok(None),
            Err(e) => Err(WasapiError::Call {
                call: "GetDefaultAudioEndpoint",
                source: e,
            }
            .into()),
        }
    }

    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn AudioEndpoint>, CaptureError> {
        let enumerator = enumerator()?;
        let wide: Vec<u16> = endpoint.id.encode_utf16().chain(std::iter::once(0)).collect();
        let client: IAudioClient = unsafe {
            let device = enumerator.GetDevice(PCWSTR(wide.as_ptr())).call("IMMDeviceEnumerator::GetDevice")?;
            device.Activate(CLSCTX_ALL, None).call("IMMDevice::Activate")?
        };
        log::debug!("opened {} endpoint {}", endpoint.kind, endpoint.display_name);
        Ok(Box::new(WasapiEndpoint::new(endpoint.display_name.clone(), client)))
    }
}
