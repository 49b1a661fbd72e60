//! Calibration persistence
//!
//! Calibrations live in a small non-volatile region as three fixed blocks.
//! Every block starts with a magic word and a version byte followed by
//! little-endian values.
//!
//! | Block         | Offset | Payload                                      |
//! |---------------|--------|----------------------------------------------|
//! | magnetometer  | 0      | offset[3], inverse soft iron[9], B, error, order |
//! | gyroscope     | 80     | bias[3]                                      |
//! | accelerometer | 112    | offset[3], inverse gain[9]                   |

use nalgebra::{Matrix3, Vector3};

use crate::calibration::{AccelCalibration, GyroCalibration, MagCalibration, SolverOrder};
use crate::error::StorageError;

/// Size of the calibration region in bytes
pub const STORAGE_SIZE: usize = 256;

/// Marks a block holding a calibration
pub const MAGIC: u32 = 0x1234_5678;
/// Written over the magic word to erase a block
pub const ERASED: u32 = 0xDEAD_BEEF;
/// Current payload layout
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = 5;

const MAG_OFFSET: usize = 0;
const GYRO_OFFSET: usize = 80;
const ACCEL_OFFSET: usize = 112;

/// Encoded magnetometer calibration size, excluding the header
pub const MAG_PAYLOAD_LEN: usize = 15 * 4;
const GYRO_PAYLOAD_LEN: usize = 3 * 4;
const ACCEL_PAYLOAD_LEN: usize = 12 * 4;

/// Byte-addressed non-volatile memory.
///
/// Writes may be buffered until [`NvmStorage::commit`].
pub trait NvmStorage {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Make buffered writes durable.
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// RAM-backed storage, for tests and boards without NVM
#[derive(Debug, Clone)]
pub struct MemoryStorage<const N: usize = STORAGE_SIZE> {
    bytes: [u8; N],
    commits: usize,
}

impl<const N: usize> MemoryStorage<N> {
    /// Blank storage, filled with `0xFF` like erased flash
    pub fn new() -> Self {
        Self {
            bytes: [0xFF; N],
            commits: 0,
        }
    }

    /// Raw contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of successful commits
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl<const N: usize> Default for MemoryStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvmStorage for MemoryStorage<N> {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError> {
        let source = self
            .bytes
            .get(offset..offset + buffer.len())
            .ok_or(StorageError::OutOfRange)?;
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let target = self
            .bytes
            .get_mut(offset..offset + data.len())
            .ok_or(StorageError::OutOfRange)?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}

/// Sequential little-endian writer over a fixed buffer
struct Encoder<'a> {
    bytes: &'a mut [u8],
    position: usize,
}

impl<'a> Encoder<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn put(&mut self, data: &[u8]) {
        self.bytes[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
    }

    fn f32(&mut self, value: f32) {
        self.put(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    fn vector(&mut self, vector: &Vector3<f32>) {
        vector.iter().for_each(|value| self.f32(*value));
    }

    /// Row-major
    fn matrix(&mut self, matrix: &Matrix3<f32>) {
        for row in 0..3 {
            for column in 0..3 {
                self.f32(matrix[(row, column)]);
            }
        }
    }
}

/// Sequential little-endian reader over a fixed buffer
struct Decoder<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take4(&mut self) -> [u8; 4] {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[self.position..self.position + 4]);
        self.position += 4;
        word
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take4())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take4())
    }

    fn vector(&mut self) -> Vector3<f32> {
        let x = self.f32();
        let y = self.f32();
        let z = self.f32();
        Vector3::new(x, y, z)
    }

    fn matrix(&mut self) -> Matrix3<f32> {
        let mut matrix = Matrix3::zeros();
        for row in 0..3 {
            for column in 0..3 {
                matrix[(row, column)] = self.f32();
            }
        }
        matrix
    }
}

/// Encode a magnetometer calibration payload.
pub fn encode_mag(calibration: &MagCalibration, bytes: &mut [u8; MAG_PAYLOAD_LEN]) {
    let mut encoder = Encoder::new(bytes);
    encoder.vector(&calibration.offset);
    encoder.matrix(&calibration.inverse_soft_iron);
    encoder.f32(calibration.field_strength);
    encoder.f32(calibration.fit_error);
    encoder.i32(calibration.order.elements());
}

/// Decode a magnetometer calibration payload. `None` for an unknown order
/// or non-finite values.
pub fn decode_mag(bytes: &[u8; MAG_PAYLOAD_LEN]) -> Option<MagCalibration> {
    let mut decoder = Decoder::new(bytes);
    let offset = decoder.vector();
    let inverse_soft_iron = decoder.matrix();
    let field_strength = decoder.f32();
    let fit_error = decoder.f32();
    let order = SolverOrder::from_elements(decoder.i32())?;

    let finite = offset.iter().all(|v| v.is_finite())
        && inverse_soft_iron.iter().all(|v| v.is_finite())
        && field_strength.is_finite()
        && fit_error.is_finite();
    finite.then_some(MagCalibration {
        offset,
        inverse_soft_iron,
        field_strength,
        fit_error,
        order,
    })
}

/// Gateway between calibrations and an [`NvmStorage`] device.
pub struct CalibrationStore<S> {
    storage: S,
}

impl<S: NvmStorage> CalibrationStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn save_mag(&mut self, calibration: &MagCalibration) -> Result<(), StorageError> {
        let mut payload = [0u8; MAG_PAYLOAD_LEN];
        encode_mag(calibration, &mut payload);
        self.write_block(MAG_OFFSET, &payload)
    }

    /// Stored magnetometer calibration, `None` when absent or unreadable.
    pub fn load_mag(&mut self) -> Option<MagCalibration> {
        let mut payload = [0u8; MAG_PAYLOAD_LEN];
        self.read_block(MAG_OFFSET, &mut payload)?;
        decode_mag(&payload)
    }

    pub fn erase_mag(&mut self) -> Result<(), StorageError> {
        self.erase_block(MAG_OFFSET)
    }

    pub fn save_gyro(&mut self, calibration: &GyroCalibration) -> Result<(), StorageError> {
        let mut payload = [0u8; GYRO_PAYLOAD_LEN];
        Encoder::new(&mut payload).vector(&calibration.bias);
        self.write_block(GYRO_OFFSET, &payload)
    }

    pub fn load_gyro(&mut self) -> Option<GyroCalibration> {
        let mut payload = [0u8; GYRO_PAYLOAD_LEN];
        self.read_block(GYRO_OFFSET, &mut payload)?;
        let bias = Decoder::new(&payload).vector();
        bias.iter()
            .all(|v| v.is_finite())
            .then_some(GyroCalibration { bias })
    }

    pub fn erase_gyro(&mut self) -> Result<(), StorageError> {
        self.erase_block(GYRO_OFFSET)
    }

    pub fn save_accel(&mut self, calibration: &AccelCalibration) -> Result<(), StorageError> {
        let mut payload = [0u8; ACCEL_PAYLOAD_LEN];
        let mut encoder = Encoder::new(&mut payload);
        encoder.vector(&calibration.offset);
        encoder.matrix(&calibration.inverse_gain);
        self.write_block(ACCEL_OFFSET, &payload)
    }

    pub fn load_accel(&mut self) -> Option<AccelCalibration> {
        let mut payload = [0u8; ACCEL_PAYLOAD_LEN];
        self.read_block(ACCEL_OFFSET, &mut payload)?;
        let mut decoder = Decoder::new(&payload);
        let offset = decoder.vector();
        let inverse_gain = decoder.matrix();
        let finite = offset.iter().all(|v| v.is_finite())
            && inverse_gain.iter().all(|v| v.is_finite());
        finite.then_some(AccelCalibration {
            offset,
            inverse_gain,
        })
    }

    pub fn erase_accel(&mut self) -> Result<(), StorageError> {
        self.erase_block(ACCEL_OFFSET)
    }

    /// Erase every block. Stops at the first failure.
    pub fn erase_all(&mut self) -> Result<(), StorageError> {
        self.erase_mag()?;
        self.erase_gyro()?;
        self.erase_accel()
    }

    fn write_block(&mut self, offset: usize, payload: &[u8]) -> Result<(), StorageError> {
        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(&MAGIC.to_le_bytes());
        header[4] = FORMAT_VERSION;

        self.storage.write(offset, &header)?;
        self.storage.write(offset + HEADER_LEN, payload)?;
        self.commit();
        Ok(())
    }

    fn read_block(&mut self, offset: usize, payload: &mut [u8]) -> Option<()> {
        let mut header = [0u8; HEADER_LEN];
        if let Err(error) = self.storage.read(offset, &mut header) {
            log::warn!("calibration read at {} failed: {}", offset, error);
            return None;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != MAGIC {
            return None;
        }
        if header[4] != FORMAT_VERSION {
            log::warn!("calibration at {} has unknown version {}", offset, header[4]);
            return None;
        }

        match self.storage.read(offset + HEADER_LEN, payload) {
            Ok(()) => Some(()),
            Err(error) => {
                log::warn!("calibration read at {} failed: {}", offset, error);
                None
            }
        }
    }

    fn erase_block(&mut self, offset: usize) -> Result<(), StorageError> {
        self.storage.write(offset, &ERASED.to_le_bytes())?;
        self.commit();
        Ok(())
    }

    fn commit(&mut self) {
        if let Err(error) = self.storage.commit() {
            log::warn!("calibration commit failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mag_calibration() -> MagCalibration {
        MagCalibration {
            offset: Vector3::new(12.5, -3.25, 40.0),
            inverse_soft_iron: Matrix3::new(
                1.02, 0.01, -0.02, //
                0.01, 0.97, 0.03, //
                -0.02, 0.03, 1.01,
            ),
            field_strength: 48.7,
            fit_error: 1.9,
            order: SolverOrder::Ten,
        }
    }

    #[test]
    fn test_blank_storage_has_no_calibrations() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        assert_eq!(store.load_mag(), None);
        assert_eq!(store.load_gyro(), None);
        assert_eq!(store.load_accel(), None);
    }

    #[test]
    fn test_mag_calibration_survives_storage() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        let calibration = mag_calibration();
        store.save_mag(&calibration).unwrap();

        assert_eq!(store.load_mag(), Some(calibration));
        assert_eq!(store.storage().commits(), 1);
        assert_eq!(&store.storage().as_bytes()[..4], &MAGIC.to_le_bytes());
    }

    #[test]
    fn test_blocks_are_independent() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        let gyro = GyroCalibration {
            bias: Vector3::new(0.4, -0.2, 0.1),
        };
        let accel = AccelCalibration {
            offset: Vector3::new(0.01, -0.02, 0.03),
            inverse_gain: Matrix3::from_diagonal(&Vector3::new(1.01, 0.99, 1.0)),
        };
        store.save_mag(&mag_calibration()).unwrap();
        store.save_gyro(&gyro).unwrap();
        store.save_accel(&accel).unwrap();

        store.erase_gyro().unwrap();
        assert_eq!(store.load_gyro(), None);
        assert_eq!(store.load_mag(), Some(mag_calibration()));
        assert_eq!(store.load_accel(), Some(accel));
    }

    #[test]
    fn test_erase_writes_marker() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        store.save_mag(&mag_calibration()).unwrap();
        store.erase_mag().unwrap();

        assert_eq!(&store.storage().as_bytes()[..4], &ERASED.to_le_bytes());
        assert_eq!(store.load_mag(), None);
    }

    #[test]
    fn test_erase_all() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        store.save_mag(&mag_calibration()).unwrap();
        store.save_gyro(&GyroCalibration::default()).unwrap();
        store.save_accel(&AccelCalibration::default()).unwrap();

        store.erase_all().unwrap();
        assert_eq!(store.load_mag(), None);
        assert_eq!(store.load_gyro(), None);
        assert_eq!(store.load_accel(), None);
    }

    #[test]
    fn test_unknown_version_is_ignored() {
        let mut store = CalibrationStore::new(MemoryStorage::<STORAGE_SIZE>::new());
        store.save_mag(&mag_calibration()).unwrap();
        store.storage_mut().write(4, &[FORMAT_VERSION + 1]).unwrap();
        assert_eq!(store.load_mag(), None);
    }

    #[test]
    fn test_corrupt_order_is_ignored() {
        let mut payload = [0u8; MAG_PAYLOAD_LEN];
        encode_mag(&mag_calibration(), &mut payload);
        payload[MAG_PAYLOAD_LEN - 4..].copy_from_slice(&5i32.to_le_bytes());
        assert_eq!(decode_mag(&payload), None);
    }

    #[test]
    fn test_small_device_reports_out_of_range() {
        let mut store = CalibrationStore::new(MemoryStorage::<64>::new());
        assert_eq!(
            store.save_accel(&AccelCalibration::default()),
            Err(StorageError::OutOfRange)
        );
        assert_eq!(store.load_accel(), None);
    }

    struct FailingCommit(MemoryStorage<STORAGE_SIZE>);

    impl NvmStorage for FailingCommit {
        fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError> {
            self.0.read(offset, buffer)
        }

        fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
            self.0.write(offset, data)
        }

        fn commit(&mut self) -> Result<(), StorageError> {
            Err(StorageError::Io)
        }
    }

    #[test]
    fn test_commit_failure_is_swallowed() {
        let mut store = CalibrationStore::new(FailingCommit(MemoryStorage::new()));
        assert!(store.save_mag(&mag_calibration()).is_ok());
        assert_eq!(store.load_mag(), Some(mag_calibration()));
    }
}
