//! Credential and threshold records kept in a reserved flash region.
//!
//! Each record owns one sector at `base + slot * SECTOR_SIZE` and is laid out
//! as `magic:u32 | version:u8 | len:u16 | payload | crc32`, all little endian.
//! An erased sector, a foreign magic or a checksum mismatch reads as "not
//! stored".

use crc::{CRC_32_ISO_HDLC, Crc};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_storage::{ReadStorage, Storage};
use heapless::String;
use log::{debug, warn};

use crate::error::StoreError;
use crate::model::{Credential, MeasurementKind, Range, ThresholdLimits};
use crate::traits::CredentialStore;

pub const SECTOR_SIZE: u32 = 4096;

/// Sectors the store needs starting at its base offset.
pub const STORE_SECTORS: u32 = 2;

const CREDENTIAL_SLOT: u32 = 0;
const LIMITS_SLOT: u32 = 1;

const CREDENTIAL_MAGIC: u32 = 0x4352_4544;
const LIMITS_MAGIC: u32 = 0x4C49_4D54;
const RECORD_VERSION: u8 = 1;

const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 4;
const RECORD_MAX: usize = 128;
const PAYLOAD_MAX: usize = RECORD_MAX - HEADER_LEN - CRC_LEN;
const LIMITS_PAYLOAD_LEN: usize = 6 * 16;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Flash-backed [`CredentialStore`]. The flash sits behind a mutex so the OTA
/// updater can borrow it between store operations.
pub struct FlashStore<'a, M: RawMutex, F> {
    flash: &'a Mutex<M, F>,
    base: u32,
}

impl<'a, M: RawMutex, F: Storage> FlashStore<'a, M, F> {
    pub fn new(flash: &'a Mutex<M, F>, base: u32) -> Self {
        Self { flash, base }
    }

    fn offset(&self, slot: u32) -> u32 {
        self.base + slot * SECTOR_SIZE
    }

    async fn read_record(
        &mut self,
        slot: u32,
        magic: u32,
        buf: &mut [u8; RECORD_MAX],
    ) -> Result<Option<usize>, StoreError> {
        let offset = self.offset(slot);
        self.flash
            .lock()
            .await
            .read(offset, buf)
            .map_err(|_| StoreError::Io)?;
        Ok(decode_record(magic, buf))
    }

    async fn write_record(&mut self, slot: u32, magic: u32, payload: &[u8]) -> Result<(), StoreError> {
        let mut record = [0xFFu8; RECORD_MAX];
        let len = encode_record(magic, payload, &mut record)?;
        let offset = self.offset(slot);
        self.flash
            .lock()
            .await
            .write(offset, &record[..len])
            .map_err(|_| StoreError::Io)
    }
}

impl<M: RawMutex, F: Storage> CredentialStore for FlashStore<'_, M, F> {
    async fn get_credential(&mut self) -> Result<Option<Credential>, StoreError> {
        let mut buf = [0u8; RECORD_MAX];
        let Some(len) = self.read_record(CREDENTIAL_SLOT, CREDENTIAL_MAGIC, &mut buf).await? else {
            return Ok(None);
        };
        let credential = decode_credential(&buf[HEADER_LEN..HEADER_LEN + len]);
        if credential.is_none() {
            warn!("Store: credential record has an invalid payload");
        }
        Ok(credential)
    }

    async fn set_credential(&mut self, credential: &Credential) -> Result<(), StoreError> {
        let mut payload = [0u8; PAYLOAD_MAX];
        let len = encode_credential(credential, &mut payload)?;
        self.write_record(CREDENTIAL_SLOT, CREDENTIAL_MAGIC, &payload[..len])
            .await?;
        debug!("Store: credential for {} written", credential.network_id);
        Ok(())
    }

    async fn get_limits(&mut self) -> Result<Option<ThresholdLimits>, StoreError> {
        let mut buf = [0u8; RECORD_MAX];
        let Some(len) = self.read_record(LIMITS_SLOT, LIMITS_MAGIC, &mut buf).await? else {
            return Ok(None);
        };
        Ok(decode_limits(&buf[HEADER_LEN..HEADER_LEN + len]))
    }

    async fn set_limits(&mut self, limits: &ThresholdLimits) -> Result<(), StoreError> {
        let payload = encode_limits(limits);
        self.write_record(LIMITS_SLOT, LIMITS_MAGIC, &payload).await?;
        debug!("Store: limits written");
        Ok(())
    }
}

/// Writes `credential` into an empty store. Returns whether it was written.
pub async fn seed_credential<S: CredentialStore>(
    store: &mut S,
    credential: &Credential,
) -> Result<bool, StoreError> {
    if store.get_credential().await?.is_some() {
        return Ok(false);
    }
    store.set_credential(credential).await?;
    Ok(true)
}

fn encode_record(magic: u32, payload: &[u8], record: &mut [u8; RECORD_MAX]) -> Result<usize, StoreError> {
    if payload.len() > PAYLOAD_MAX {
        return Err(StoreError::TooLarge);
    }
    let end = HEADER_LEN + payload.len();
    record[0..4].copy_from_slice(&magic.to_le_bytes());
    record[4] = RECORD_VERSION;
    record[5..7].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    record[HEADER_LEN..end].copy_from_slice(payload);
    let crc = CRC32.checksum(&record[..end]);
    record[end..end + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
    Ok(end + CRC_LEN)
}

/// Validates the record in `record` and returns its payload length.
fn decode_record(magic: u32, record: &[u8; RECORD_MAX]) -> Option<usize> {
    if record[..HEADER_LEN].iter().all(|&byte| byte == 0xFF) {
        return None;
    }
    if u32::from_le_bytes([record[0], record[1], record[2], record[3]]) != magic {
        return None;
    }
    if record[4] != RECORD_VERSION {
        return None;
    }
    let len = u16::from_le_bytes([record[5], record[6]]) as usize;
    if len > PAYLOAD_MAX {
        return None;
    }
    let end = HEADER_LEN + len;
    let stored = u32::from_le_bytes([
        record[end],
        record[end + 1],
        record[end + 2],
        record[end + 3],
    ]);
    (CRC32.checksum(&record[..end]) == stored).then_some(len)
}

fn encode_credential(credential: &Credential, payload: &mut [u8]) -> Result<usize, StoreError> {
    let id = credential.network_id.as_bytes();
    let secret = credential.secret.as_bytes();
    let len = 2 + id.len() + secret.len();
    if len > payload.len() {
        return Err(StoreError::TooLarge);
    }
    payload[0] = id.len() as u8;
    payload[1..1 + id.len()].copy_from_slice(id);
    payload[1 + id.len()] = secret.len() as u8;
    payload[2 + id.len()..len].copy_from_slice(secret);
    Ok(len)
}

fn decode_credential(payload: &[u8]) -> Option<Credential> {
    let (&id_len, rest) = payload.split_first()?;
    let id = rest.get(..id_len as usize)?;
    let (&secret_len, rest) = rest.get(id_len as usize..)?.split_first()?;
    let secret = rest.get(..secret_len as usize)?;
    Some(Credential {
        network_id: String::try_from(core::str::from_utf8(id).ok()?).ok()?,
        secret: String::try_from(core::str::from_utf8(secret).ok()?).ok()?,
    })
}

fn encode_limits(limits: &ThresholdLimits) -> [u8; LIMITS_PAYLOAD_LEN] {
    let mut payload = [0u8; LIMITS_PAYLOAD_LEN];
    for (chunk, kind) in payload.chunks_exact_mut(16).zip(MeasurementKind::ALL) {
        let range = limits.range(kind);
        chunk[..8].copy_from_slice(&range.min.to_le_bytes());
        chunk[8..].copy_from_slice(&range.max.to_le_bytes());
    }
    payload
}

fn decode_limits(payload: &[u8]) -> Option<ThresholdLimits> {
    if payload.len() != LIMITS_PAYLOAD_LEN {
        return None;
    }
    let mut ranges = [Range::UNBOUNDED; 6];
    for (range, chunk) in ranges.iter_mut().zip(payload.chunks_exact(16)) {
        let (min, max) = chunk.split_at(8);
        range.min = f64::from_le_bytes(min.try_into().ok()?);
        range.max = f64::from_le_bytes(max.try_into().ok()?);
    }
    let [moisture, temperature, humidity, pressure, white, visible] = ranges;
    Some(ThresholdLimits {
        moisture,
        temperature,
        humidity,
        pressure,
        white,
        visible,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    /// Erased-flash stand-in: starts as 0xFF and counts writes.
    pub(crate) struct RamFlash {
        pub bytes: Vec<u8>,
        pub writes: usize,
        pub fail: bool,
    }

    impl RamFlash {
        pub(crate) fn new(sectors: u32) -> Self {
            Self {
                bytes: vec![0xFF; (sectors * SECTOR_SIZE) as usize],
                writes: 0,
                fail: false,
            }
        }
    }

    #[derive(Debug)]
    pub(crate) struct RamFlashError;

    impl ReadStorage for RamFlash {
        type Error = RamFlashError;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail {
                return Err(RamFlashError);
            }
            let start = offset as usize;
            let src = self.bytes.get(start..start + bytes.len()).ok_or(RamFlashError)?;
            bytes.copy_from_slice(src);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for RamFlash {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.fail {
                return Err(RamFlashError);
            }
            let start = offset as usize;
            let dst = self
                .bytes
                .get_mut(start..start + bytes.len())
                .ok_or(RamFlashError)?;
            dst.copy_from_slice(bytes);
            self.writes += 1;
            Ok(())
        }
    }

    fn sample_limits() -> ThresholdLimits {
        ThresholdLimits {
            moisture: Range::new(10.0, 90.0),
            temperature: Range::new(-5.0, 35.0),
            humidity: Range::new(20.0, 80.0),
            pressure: Range::new(950.0, 1050.0),
            white: Range::new(0.0, 500.0),
            visible: Range::new(0.0, 400.0),
        }
    }

    #[test]
    fn erased_flash_reads_as_not_found() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        assert_eq!(block_on(store.get_credential()), Ok(None));
        assert_eq!(block_on(store.get_limits()), Ok(None));
    }

    #[test]
    fn credential_survives_a_reopen() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(3));
        let credential = Credential::new("Net", "pass1234").unwrap();
        block_on(FlashStore::new(&flash, SECTOR_SIZE).set_credential(&credential)).unwrap();

        let mut reopened = FlashStore::new(&flash, SECTOR_SIZE);
        assert_eq!(block_on(reopened.get_credential()), Ok(Some(credential)));
    }

    #[test]
    fn credential_overwrite_replaces_record() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        let long = Credential::new("A-much-longer-network-name", "a-long-secret-value").unwrap();
        let short = Credential::new("Net", "pw").unwrap();
        block_on(store.set_credential(&long)).unwrap();
        block_on(store.set_credential(&short)).unwrap();
        assert_eq!(block_on(store.get_credential()), Ok(Some(short)));
    }

    #[test]
    fn limits_are_stored_as_a_whole_record() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        block_on(store.set_limits(&sample_limits())).unwrap();
        assert_eq!(block_on(store.get_limits()), Ok(Some(sample_limits())));
        assert_eq!(block_on(flash.lock()).writes, 1);
        assert_eq!(block_on(store.get_credential()), Ok(None));
    }

    #[test]
    fn corrupted_record_reads_as_not_found() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        block_on(store.set_limits(&sample_limits())).unwrap();

        block_on(flash.lock()).bytes[(SECTOR_SIZE as usize) + HEADER_LEN + 3] ^= 0x40;
        assert_eq!(block_on(store.get_limits()), Ok(None));
    }

    #[test]
    fn foreign_magic_reads_as_not_found() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        block_on(store.set_credential(&Credential::new("Net", "pass1234").unwrap())).unwrap();

        // A credential record sitting in the limits slot is not a limits record.
        {
            let mut guard = block_on(flash.lock());
            let (credential, limits) = guard.bytes.split_at_mut(SECTOR_SIZE as usize);
            limits[..RECORD_MAX].copy_from_slice(&credential[..RECORD_MAX]);
        }
        assert_eq!(block_on(store.get_limits()), Ok(None));
    }

    #[test]
    fn medium_failure_surfaces_as_io_error() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        block_on(flash.lock()).fail = true;
        let mut store = FlashStore::new(&flash, 0);
        assert_eq!(block_on(store.get_credential()), Err(StoreError::Io));
        assert_eq!(
            block_on(store.set_limits(&sample_limits())),
            Err(StoreError::Io)
        );
    }

    #[test]
    fn seeding_never_overwrites_a_stored_credential() {
        let flash = Mutex::<NoopRawMutex, _>::new(RamFlash::new(STORE_SECTORS));
        let mut store = FlashStore::new(&flash, 0);
        let provisioned = Credential::new("Provisioned", "pass1234").unwrap();
        let factory = Credential::new("Factory", "factory1").unwrap();

        assert_eq!(block_on(seed_credential(&mut store, &provisioned)), Ok(true));
        assert_eq!(block_on(seed_credential(&mut store, &factory)), Ok(false));
        assert_eq!(block_on(store.get_credential()), Ok(Some(provisioned)));
    }
}
