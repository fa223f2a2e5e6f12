use tracing::debug;

use crate::codec::PayloadMap;
use crate::command::{Command, ProgressDecision, Request};
use crate::config::EngineConfig;
use crate::error::NewtError;

/// What the upload should do after the device accepted `offset` bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum UploadStep {
    /// Send this encoded chunk payload.
    Send { payload: Vec<u8>, chunk_len: usize },
    /// Every byte has been accepted.
    Finished,
    /// The caller asked to stop.
    Cancelled,
    /// The transfer cannot continue.
    Failed(NewtError),
}

/// Splits an image into offset-addressed chunks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UploadChunker {
    max_chunk_payload: usize,
    first_chunk_reserve: usize,
    min_image_len: usize,
}

impl UploadChunker {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            max_chunk_payload: config.max_chunk_payload(),
            first_chunk_reserve: config.first_chunk_reserve(),
            min_image_len: config.min_image_len(),
        }
    }

    /// Rejects images below the minimum upload length.
    pub(crate) fn validate(&self, image: &[u8]) -> Result<(), NewtError> {
        if image.len() < self.min_image_len {
            debug!(
                image_len = image.len(),
                min_image_len = self.min_image_len,
                "upload image is too small"
            );
            return Err(NewtError::UpdateImageInvalid);
        }
        Ok(())
    }

    /// Image bytes carried by the chunk starting at `offset`.
    ///
    /// The first chunk gives up `first_chunk_reserve` bytes to the total-length
    /// field. An offset at or past the end yields zero.
    pub(crate) fn chunk_len(&self, total: usize, offset: usize) -> usize {
        let budget = if offset == 0 {
            self.max_chunk_payload - self.first_chunk_reserve
        } else {
            self.max_chunk_payload
        };
        total.saturating_sub(offset).min(budget)
    }

    /// Reports progress, then decides the next step for the head upload request.
    ///
    /// Progress is checked before completion so a cancel on the last ack
    /// still wins.
    pub(crate) fn next_step(&self, request: &mut Request, offset: usize) -> UploadStep {
        let total = match request.command() {
            Command::Upload { image } => image.len(),
            other => {
                debug!(command = other.kind(), "upload step on a non-upload request");
                return UploadStep::Failed(NewtError::Internal);
            }
        };

        if request.report_progress(progress_fraction(offset, total)) == ProgressDecision::Cancel {
            return UploadStep::Cancelled;
        }
        if offset >= total {
            return UploadStep::Finished;
        }

        let Command::Upload { image } = request.command() else {
            return UploadStep::Failed(NewtError::Internal);
        };
        let chunk_len = self.chunk_len(total, offset);
        match chunk_payload(image, offset, chunk_len).encode() {
            Ok(payload) => UploadStep::Send { payload, chunk_len },
            Err(error) => {
                debug!(%error, "failed to encode upload chunk");
                UploadStep::Failed(NewtError::Internal)
            }
        }
    }
}

fn chunk_payload(image: &[u8], offset: usize, chunk_len: usize) -> PayloadMap {
    let map = PayloadMap::new()
        .uint("off", to_wire_uint(offset))
        .bytes("data", &image[offset..offset + chunk_len]);
    if offset == 0 {
        map.uint("len", to_wire_uint(image.len()))
    } else {
        map
    }
}

fn progress_fraction(offset: usize, total: usize) -> f32 {
    if total == 0 {
        return 1.0;
    }
    (offset as f32 / total as f32).min(1.0)
}

fn to_wire_uint(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
