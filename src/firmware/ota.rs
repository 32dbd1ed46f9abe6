use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embedded_io_async::Read;
use esp_bootloader_esp_idf::ota::OtaImageState;
use esp_bootloader_esp_idf::ota_updater::OtaUpdater;
use esp_bootloader_esp_idf::partitions::PARTITION_TABLE_MAX_LEN;
use log::{debug, error, info};

use super::SharedFlash;
use super::transport::{SOCKET_BUFFER, send_request};
use crate::config;
use crate::error::{OtaError, TransportError};
use crate::http::{self, Url};
use crate::traits::OtaPrimitive;
use crate::update::ImageWriter;

/// Downloads images over the station interface into the inactive app slot.
pub struct EspOta {
    stack: Stack<'static>,
    flash: &'static SharedFlash,
}

impl EspOta {
    pub fn new(stack: Stack<'static>, flash: &'static SharedFlash) -> Self {
        Self { stack, flash }
    }
}

impl OtaPrimitive for EspOta {
    async fn fetch_and_apply(&mut self, url: &str) -> Result<(), OtaError> {
        let url = Url::parse(url)?;

        let mut rx_buffer = [0; SOCKET_BUFFER];
        let mut tx_buffer = [0; SOCKET_BUFFER];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
        let result = download(self.stack, &mut socket, &url, self.flash).await;
        socket.close();
        result
    }

    fn restart(&mut self) -> ! {
        esp_hal::system::software_reset()
    }
}

async fn download(
    stack: Stack<'static>,
    socket: &mut TcpSocket<'_>,
    url: &Url<'_>,
    flash: &'static SharedFlash,
) -> Result<(), OtaError> {
    send_request(
        stack,
        socket,
        "GET",
        url,
        &[("Version", config::FIRMWARE_VERSION)],
        None,
    )
    .await?;

    let mut chunk = [0u8; SOCKET_BUFFER];
    let (head, filled) = http::read_response_head(socket, &mut chunk).await?;
    if head.status != 200 {
        return Err(TransportError::Status(head.status).into());
    }
    let size = head
        .content_length
        .ok_or(TransportError::InvalidResponse)?;
    let expected = u32::try_from(size).map_err(|_| OtaError::TooLarge)?;
    debug!("HTTP Client: headers received, downloading {size} bytes...");

    let mut flash = flash.lock().await;
    let mut buffer = [0u8; PARTITION_TABLE_MAX_LEN];
    let mut ota = OtaUpdater::new(&mut *flash, &mut buffer).map_err(|e| {
        error!("Update: failed to create OTA updater: {e:?}");
        OtaError::Partition
    })?;

    {
        let (mut slot, part_type) = ota.next_partition().map_err(|e| {
            error!("Update: failed to get next partition: {e:?}");
            OtaError::Partition
        })?;
        debug!("Update: flashing image to {part_type:?}");

        let mut writer = ImageWriter::new(&mut slot, expected)?;
        writer.write(&chunk[head.header_len..filled])?;
        loop {
            let n = socket
                .read(&mut chunk)
                .await
                .map_err(|_| TransportError::Io)?;
            if n == 0 {
                break;
            }
            writer.write(&chunk[..n])?;
        }
        let written = writer.finish()?;
        info!("Update: {written} bytes written");
    }

    ota.activate_next_partition().map_err(|e| {
        error!("Update: failed to activate partition: {e:?}");
        OtaError::Partition
    })?;
    if let Err(e) = ota.set_current_ota_state(OtaImageState::New) {
        error!("Update: failed to set OTA state: {e:?}");
    }
    Ok(())
}
