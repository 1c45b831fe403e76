use std::sync::Arc;

use crate::models::endpoint::{Endpoint, EndpointKind};
use crate::models::error::CaptureError;
use crate::traits::endpoint::EndpointProvider;

/// Enumerates endpoints of one kind and marks the system default.
#[derive(Clone)]
pub struct EndpointDirectory {
    provider: Arc<dyn EndpointProvider>,
}

impl EndpointDirectory {
    pub fn new(provider: Arc<dyn EndpointProvider>) -> Self {
        Self { provider }
    }

    /// Active endpoints of `kind`, in enumeration order.
    ///
    /// Ordinals are assigned in order and are only valid against this
    /// listing. Devices without a readable name get a placeholder. At most
    /// one entry is marked default: the first whose id matches the OS
    /// default for `kind`.
    pub fn try_list(&self, kind: EndpointKind) -> Result<Vec<Endpoint>, CaptureError> {
        let descriptors = self.provider.enumerate(kind)?;
        let default_id = match self.provider.default_device_id(kind) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("no default {} device: {}", kind, e);
                None
            }
        };

        let mut default_marked = false;
        let endpoints = descriptors
            .into_iter()
            .filter(|d| d.is_active)
            .enumerate()
            .map(|(ordinal, d)| {
                let is_system_default =
                    !default_marked && default_id.as_deref() == Some(d.id.as_str());
                default_marked |= is_system_default;
                Endpoint {
                    display_name: d
                        .name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("Audio Device {}", ordinal + 1)),
                    id: d.id,
                    kind,
                    is_system_default,
                    ordinal,
                }
            })
            .collect::<Vec<_>>();

        log::debug!("{} {} endpoint(s) listed", endpoints.len(), kind);
        Ok(endpoints)
    }

    /// Like `try_list`, but an enumeration failure yields an empty listing
    /// alongside the error instead of failing.
    pub fn list(&self, kind: EndpointKind) -> (Vec<Endpoint>, Option<CaptureError>) {
        match self.try_list(kind) {
            Ok(endpoints) => (endpoints, None),
            Err(e) => {
                log::error!("failed to enumerate {} endpoints: {}", kind, e);
                (Vec::new(), Some(e))
            }
        }
    }
}
