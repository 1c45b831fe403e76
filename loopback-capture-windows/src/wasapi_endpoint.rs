//! A shared-mode WASAPI stream on one endpoint.
//!
//! Loopback streams open the render endpoint with
//! `AUDCLNT_STREAMFLAGS_LOOPBACK` and receive whatever that device plays;
//! direct streams read the capture endpoint itself. Both ask the audio
//! engine to convert to 16-bit PCM, so chunks arrive in the negotiated
//! format regardless of the device's float mix format.
//!
//! DRM-protected audio is delivered as silence in loopback.

use std::time::Duration;

use windows::core::{GUID, PCWSTR};
use windows::Win32::Foundation::{HANDLE, S_FALSE, S_OK};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_E_UNSUPPORTED_FORMAT,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_LOOPBACK,
    AUDCLNT_STREAMFLAGS_NOPERSIST, AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::CoTaskMemFree;
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use loopback_capture_core::{
    AudioEndpoint, CaptureError, CaptureFormat, Chunk, FormatSupport, MixFormat, SampleEncoding, StreamMode,
};

use crate::com;
use crate::error::{transient, CallContext, WasapiError};

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const KSDATAFORMAT_SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// Plain 16-bit PCM `WAVEFORMATEX` for `format`.
fn wave_format(format: &CaptureFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM,
        nChannels: format.channels(),
        nSamplesPerSec: format.sample_rate_hz(),
        nAvgBytesPerSec: format.avg_bytes_per_sec(),
        nBlockAlign: format.block_align_bytes(),
        wBitsPerSample: format.bits_per_sample(),
        cbSize: 0,
    }
}

/// Read a `WAVEFORMATEX` (or `WAVEFORMATEXTENSIBLE`) returned by WASAPI.
///
/// # Safety
/// `format` must point to a valid format block; extensible blocks must be
/// complete.
unsafe fn parse_wave_format(format: *const WAVEFORMATEX) -> Result<MixFormat, WasapiError> {
    // Packed struct: copy fields out by value.
    let tag = (*format).wFormatTag;
    let channels = (*format).nChannels;
    let sample_rate_hz = (*format).nSamplesPerSec;
    let bits = (*format).wBitsPerSample;

    let encoding = match tag {
        WAVE_FORMAT_PCM => SampleEncoding::Integer,
        WAVE_FORMAT_IEEE_FLOAT => SampleEncoding::Float,
        WAVE_FORMAT_EXTENSIBLE => {
            let ext = format as *const WAVEFORMATEXTENSIBLE;
            let sub_format = std::ptr::read_unaligned(std::ptr::addr_of!((*ext).SubFormat));
            if sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT {
                SampleEncoding::Float
            } else {
                SampleEncoding::Integer
            }
        }
        other => return Err(WasapiError::FormatTag(other)),
    };

    Ok(MixFormat {
        channels,
        sample_rate_hz,
        bits_per_sample: bits,
        encoding,
    })
}

/// An activated `IAudioClient` and, once initialized, its capture service.
pub struct WasapiEndpoint {
    label: String,
    client: IAudioClient,
    capture: Option<IAudioCaptureClient>,
    block_align: usize,
    mmcss: Option<HANDLE>,
}

// SAFETY: the interfaces were created in the multithreaded apartment, where
// they may be called from any thread, and every thread that calls them
// joins that apartment first. The capture session uses the endpoint from
// one thread at a time.
unsafe impl Send for WasapiEndpoint {}

impl WasapiEndpoint {
    pub(crate) fn new(label: String, client: IAudioClient) -> Self {
        Self {
            label,
            client,
            capture: None,
            block_align: 0,
            mmcss: None,
        }
    }

    fn capture_client(&self) -> Result<&IAudioCaptureClient, WasapiError> {
        self.capture.as_ref().ok_or(WasapiError::NotInitialized)
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn mix_format(&mut self) -> Result<MixFormat, CaptureError> {
        com::ensure_mta()?;
        unsafe {
            let ptr = self.client.GetMixFormat().call("IAudioClient::GetMixFormat")?;
            let parsed = parse_wave_format(ptr);
            CoTaskMemFree(Some(ptr as *const _));
            Ok(parsed?)
        }
    }

    fn check_format(&mut self, format: &CaptureFormat) -> Result<FormatSupport, CaptureError> {
        com::ensure_mta()?;
        let requested = wave_format(format);
        let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
        let hr = unsafe {
            self.client
                .IsFormatSupported(AUDCLNT_SHAREMODE_SHARED, &requested, Some(&mut closest as *mut _))
        };

        if hr == S_OK {
            return Ok(FormatSupport::Supported);
        }
        if hr == S_FALSE && !closest.is_null() {
            let parsed = unsafe {
                let parsed = parse_wave_format(closest);
                CoTaskMemFree(Some(closest as *const _));
                parsed
            }?;
            if parsed.is_pcm16() {
                return Ok(FormatSupport::ClosestMatch(parsed));
            }
            // The engine converts to the requested PCM format on initialize.
            log::debug!(
                "{}: closest match is {:?} {} bits; relying on PCM auto-conversion",
                self.label,
                parsed.encoding,
                parsed.bits_per_sample
            );
            return Ok(FormatSupport::Supported);
        }
        if hr == AUDCLNT_E_UNSUPPORTED_FORMAT {
            return Ok(FormatSupport::Unsupported);
        }
        Err(WasapiError::Call {
            call: "IAudioClient::IsFormatSupported",
            source: hr.into(),
        }
        .into())
    }

    fn initialize(
        &mut self,
        format: &CaptureFormat,
        mode: StreamMode,
        buffer_duration: Duration,
    ) -> Result<(), CaptureError> {
        com::ensure_mta()?;
        let mut flags =
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY | AUDCLNT_STREAMFLAGS_NOPERSIST;
        if mode == StreamMode::Loopback {
            flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
        }
        // REFERENCE_TIME is in 100 ns units.
        let hns = (buffer_duration.as_nanos() / 100) as i64;
        let wfx = wave_format(format);

        let capture: IAudioCaptureClient = unsafe {
            self.client
                .Initialize(AUDCLNT_SHAREMODE_SHARED, flags, hns, 0, &wfx, None)
                .call("IAudioClient::Initialize")?;
            self.client.GetService().call("IAudioClient::GetService")?
        };

        self.capture = Some(capture);
        self.block_align = format.block_align_bytes() as usize;
        log::debug!("{}: initialized {:?} stream at {}", self.label, mode, format);
        Ok(())
    }

    fn attach_thread(&mut self) -> Result<(), CaptureError> {
        com::ensure_mta()?;
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        match unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) } {
            Ok(handle) => self.mmcss = Some(handle),
            Err(e) => log::warn!("{}: MMCSS registration failed, capturing at normal priority: {}", self.label, e),
        }
        Ok(())
    }

    fn detach_thread(&mut self) {
        if let Some(handle) = self.mmcss.take() {
            if let Err(e) = unsafe { AvRevertMmThreadCharacteristics(handle) } {
                log::debug!("{}: MMCSS revert failed: {}", self.label, e);
            }
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.capture_client()?;
        unsafe { self.client.Start() }.call("IAudioClient::Start")?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        unsafe { self.client.Stop() }.call("IAudioClient::Stop")?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        unsafe { self.client.Reset() }.call("IAudioClient::Reset")?;
        Ok(())
    }

    fn pending_frames(&mut self) -> Result<u32, CaptureError> {
        let capture = self.capture_client().map_err(transient)?;
        unsafe { capture.GetNextPacketSize() }
            .call("IAudioCaptureClient::GetNextPacketSize")
            .map_err(transient)
    }

    fn acquire_chunk(&mut self) -> Result<Chunk<'_>, CaptureError> {
        let capture = self.capture_client().map_err(transient)?;
        let mut data: *mut u8 = std::ptr::null_mut();
        let mut frames: u32 = 0;
        let mut flags: u32 = 0;
        unsafe { capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None) }
            .call("IAudioCaptureClient::GetBuffer")
            .map_err(transient)?;

        if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
            return Ok(Chunk::silent(frames));
        }
        // SAFETY: GetBuffer returned `frames` frames of `block_align` bytes,
        // valid until ReleaseBuffer, which needs `&mut self` and so cannot
        // run while the chunk is borrowed.
        let bytes = unsafe { std::slice::from_raw_parts(data, frames as usize * self.block_align) };
        Ok(Chunk::audio(bytes, frames))
    }

    fn release_chunk(&mut self, frame_count: u32) -> Result<(), CaptureError> {
        let capture = self.capture_client().map_err(transient)?;
        unsafe { capture.ReleaseBuffer(frame_count) }
            .call("IAudioCaptureClient::ReleaseBuffer")
            .map_err(transient)
    }
}

impl Drop for WasapiEndpoint {
    fn drop(&mut self) {
        self.detach_thread();
    }
}
