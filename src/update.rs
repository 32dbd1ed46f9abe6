use embedded_storage::Storage;
use log::{debug, info, warn};

use crate::error::OtaError;
use crate::traits::OtaPrimitive;

/// First byte of every ESP application image.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Decides whether the collector's update flag turns into an OTA run.
pub struct UpdateDispatcher<'a, O> {
    ota: &'a mut O,
    url: &'a str,
}

impl<'a, O: OtaPrimitive> UpdateDispatcher<'a, O> {
    pub fn new(ota: &'a mut O, url: &'a str) -> Self {
        Self { ota, url }
    }

    /// Returns only when no update was requested or the update failed; a
    /// successful update restarts the device.
    pub async fn maybe_update(&mut self, update_available: bool) -> Result<(), OtaError> {
        if !update_available {
            return Ok(());
        }
        info!("Update: fetching firmware from {}", self.url);
        match self.ota.fetch_and_apply(self.url).await {
            Ok(()) => {
                info!("Update: new image activated, restarting");
                self.ota.restart()
            }
            Err(e) => {
                warn!("Update: keeping current firmware: {e}");
                Err(e)
            }
        }
    }
}

/// Streams a downloaded image into an OTA slot, checking the image magic and
/// the announced length.
pub struct ImageWriter<'a, S> {
    slot: &'a mut S,
    expected: u32,
    written: u32,
}

impl<'a, S: Storage> ImageWriter<'a, S> {
    pub fn new(slot: &'a mut S, expected: u32) -> Result<Self, OtaError> {
        if expected == 0 {
            return Err(OtaError::InvalidImage);
        }
        if expected as usize > slot.capacity() {
            return Err(OtaError::TooLarge);
        }
        Ok(Self {
            slot,
            expected,
            written: 0,
        })
    }

    pub fn write(&mut self, chunk: &[u8]) -> Result<(), OtaError> {
        let Some(&first) = chunk.first() else {
            return Ok(());
        };
        if self.written == 0 && first != IMAGE_MAGIC {
            return Err(OtaError::InvalidImage);
        }
        let received = self.written + chunk.len() as u32;
        if received > self.expected {
            return Err(OtaError::SizeMismatch {
                expected: self.expected,
                received,
            });
        }
        self.slot
            .write(self.written, chunk)
            .map_err(|_| OtaError::Flash)?;
        self.written = received;
        debug!("Update: {}/{} bytes written", self.written, self.expected);
        Ok(())
    }

    /// Checks that the whole image arrived and returns its size.
    pub fn finish(self) -> Result<u32, OtaError> {
        if self.written != self.expected {
            return Err(OtaError::SizeMismatch {
                expected: self.expected,
                received: self.written,
            });
        }
        Ok(self.written)
    }
}
