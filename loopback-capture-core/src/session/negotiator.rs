use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::traits::endpoint::{AudioEndpoint, FormatSupport};

/// Derive the 16-bit PCM capture format for an opened endpoint.
///
/// Takes channel count and sample rate from the endpoint's mix format,
/// forces 16 bits, and asks the endpoint whether that exact format works in
/// shared mode. A rejected format falls back to the endpoint's closest
/// match, which is adopted verbatim when it is itself 16-bit PCM.
pub fn negotiate(endpoint: &mut dyn AudioEndpoint) -> Result<CaptureFormat, CaptureError> {
    let mix = endpoint.mix_format()?;
    log::debug!(
        "mix format: {} Hz, {} ch, {} bits ({:?})",
        mix.sample_rate_hz,
        mix.channels,
        mix.bits_per_sample,
        mix.encoding
    );

    let requested = CaptureFormat::pcm16(mix.channels, mix.sample_rate_hz)?;

    match endpoint.check_format(&requested)? {
        FormatSupport::Supported => {
            log::info!("negotiated {}", requested);
            Ok(requested)
        }
        FormatSupport::ClosestMatch(closest) if closest.is_pcm16() => {
            let adopted = CaptureFormat::pcm16(closest.channels, closest.sample_rate_hz)?;
            log::info!("{} rejected; adopting closest match {}", requested, adopted);
            Ok(adopted)
        }
        FormatSupport::ClosestMatch(closest) => Err(CaptureError::UnsupportedFormat(format!(
            "{} rejected and closest match ({} bits, {:?}) is not 16-bit PCM",
            requested, closest.bits_per_sample, closest.encoding
        ))),
        FormatSupport::Unsupported => Err(CaptureError::UnsupportedFormat(format!(
            "{} rejected with no closest match",
            requested
        ))),
    }
}
