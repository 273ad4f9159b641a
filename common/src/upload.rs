//! Multi-phase firmware-replacement sequence with sticky errors.
//!
//! Once any error is recorded for the session, every later chunk/end call is
//! a no-op that reports the recorded error; the session only resets with a
//! process restart.

use thiserror::Error;

/// Marker byte every bootable image starts with.
pub const IMAGE_MAGIC: u8 = 0xE9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("No file selected")]
    NoFile,
    #[error("File size is larger than available free space")]
    InsufficientSpace,
    #[error("File magic header does not start with 0xE9")]
    BadMagic,
    #[error("File flash size is larger than device flash size")]
    FlashSizeTooLarge,
    #[error("File upload buffer miscompare")]
    WriteMismatch,
    #[error("Upload failed while finalizing the write region")]
    FinalizeFailed,
    #[error("Upload aborted")]
    Aborted,
}

impl UploadError {
    /// Stable numeric code reported on the upload result page.
    pub fn code(self) -> u8 {
        match self {
            Self::NoFile => 1,
            Self::InsufficientSpace => 2,
            Self::BadMagic => 3,
            Self::FlashSizeTooLarge => 4,
            Self::WriteMismatch => 5,
            Self::FinalizeFailed => 6,
            Self::Aborted => 7,
        }
    }
}

/// Seam to the platform's firmware write region (flash partition on real
/// hardware, a staging file on the host).
pub trait FirmwareTarget {
    /// Open a write region sized to the maximum available space. False when
    /// no region can be begun.
    fn begin(&mut self) -> bool;
    /// Returns the number of bytes actually written.
    fn write(&mut self, chunk: &[u8]) -> usize;
    /// Commit the written image so it boots next restart.
    fn finalize(&mut self) -> bool;
    /// Close and discard the write region.
    fn abort(&mut self);
    fn flash_size(&self) -> u32;
    /// Byte patched into the image header so it matches the detected
    /// hardware write mode (2 = DIO, 3 = DOUT).
    fn flash_mode_byte(&self) -> u8;
}

/// Flash capacity encoded in the image header's size nibble.
pub fn image_flash_size(code: u8) -> u32 {
    const KB: u32 = 1024;
    const MB: u32 = 1024 * 1024;
    match code & 0x0F {
        0x0 => 512 * KB,
        0x1 => 256 * KB,
        0x2 => MB,
        0x3 => 2 * MB,
        0x4 => 4 * MB,
        0x5 => 2 * MB,
        0x6 => 4 * MB,
        0x8 => 8 * MB,
        0x9 => 16 * MB,
        // Unknown codes make no size claim and pass the capacity check.
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Started,
    Writing,
    Completed,
    Errored,
    Aborted,
}

#[derive(Debug)]
pub struct UploadStateMachine {
    phase: UploadPhase,
    error: Option<UploadError>,
    bytes_written: u64,
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStateMachine {
    pub fn new() -> Self {
        Self {
            phase: UploadPhase::Idle,
            error: None,
            bytes_written: 0,
        }
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn error(&self) -> Option<UploadError> {
        self.error
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn start(
        &mut self,
        filename: &str,
        target: &mut dyn FirmwareTarget,
    ) -> Result<(), UploadError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if filename.is_empty() {
            return Err(self.fail(UploadError::NoFile));
        }
        if !target.begin() {
            return Err(self.fail(UploadError::InsufficientSpace));
        }
        self.phase = UploadPhase::Started;
        Ok(())
    }

    /// Write one chunk. The first chunk carries the image header: the magic
    /// byte is validated, the encoded flash size is checked against the real
    /// capacity, and the write-mode byte is patched in place before writing.
    pub fn chunk(
        &mut self,
        buf: &mut [u8],
        target: &mut dyn FirmwareTarget,
    ) -> Result<(), UploadError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        if self.phase == UploadPhase::Started {
            if buf.len() < 4 || buf[0] != IMAGE_MAGIC {
                return Err(self.fail(UploadError::BadMagic));
            }
            let size_code = (buf[3] & 0xF0) >> 4;
            if image_flash_size(size_code) > target.flash_size() {
                return Err(self.fail(UploadError::FlashSizeTooLarge));
            }
            buf[2] = target.flash_mode_byte();
            self.phase = UploadPhase::Writing;
        }

        let written = target.write(buf);
        if written != buf.len() {
            return Err(self.fail(UploadError::WriteMismatch));
        }
        self.bytes_written += written as u64;
        Ok(())
    }

    pub fn end(&mut self, target: &mut dyn FirmwareTarget) -> Result<(), UploadError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !target.finalize() {
            return Err(self.fail(UploadError::FinalizeFailed));
        }
        self.phase = UploadPhase::Completed;
        Ok(())
    }

    pub fn abort(&mut self, target: &mut dyn FirmwareTarget) -> UploadError {
        target.abort();
        if self.error.is_none() {
            self.error = Some(UploadError::Aborted);
        }
        self.phase = UploadPhase::Aborted;
        UploadError::Aborted
    }

    fn fail(&mut self, error: UploadError) -> UploadError {
        self.error = Some(error);
        self.phase = UploadPhase::Errored;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTarget {
        begun: bool,
        finalized: bool,
        aborted: bool,
        written: Vec<u8>,
        fail_begin: bool,
        fail_finalize: bool,
        short_write: bool,
        flash_size: u32,
    }

    impl Default for FakeTarget {
        fn default() -> Self {
            Self {
                begun: false,
                finalized: false,
                aborted: false,
                written: Vec::new(),
                fail_begin: false,
                fail_finalize: false,
                short_write: false,
                flash_size: 4 * 1024 * 1024,
            }
        }
    }

    impl FirmwareTarget for FakeTarget {
        fn begin(&mut self) -> bool {
            self.begun = !self.fail_begin;
            self.begun
        }

        fn write(&mut self, chunk: &[u8]) -> usize {
            if self.short_write {
                return chunk.len() / 2;
            }
            self.written.extend_from_slice(chunk);
            chunk.len()
        }

        fn finalize(&mut self) -> bool {
            self.finalized = !self.fail_finalize;
            self.finalized
        }

        fn abort(&mut self) {
            self.aborted = true;
        }

        fn flash_size(&self) -> u32 {
            self.flash_size
        }

        fn flash_mode_byte(&self) -> u8 {
            2
        }
    }

    // Header: magic, segment count, mode byte (to be patched), size/freq
    // nibble pair claiming 4MB (code 0x4).
    fn valid_header() -> Vec<u8> {
        vec![IMAGE_MAGIC, 0x02, 0xFF, 0x40, 0xAA, 0xBB]
    }

    #[test]
    fn happy_path_completes_and_patches_mode_byte() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget::default();

        fsm.start("firmware.bin", &mut target).expect("start");
        let mut first = valid_header();
        fsm.chunk(&mut first, &mut target).expect("first chunk");
        assert_eq!(fsm.phase(), UploadPhase::Writing);
        // Mode byte patched to the detected hardware write mode.
        assert_eq!(target.written[2], 2);

        let mut more = vec![0u8; 128];
        fsm.chunk(&mut more, &mut target).expect("chunk");
        fsm.chunk(&mut more, &mut target).expect("chunk");
        fsm.end(&mut target).expect("end");

        assert_eq!(fsm.phase(), UploadPhase::Completed);
        assert!(target.finalized);
        assert_eq!(fsm.bytes_written(), 6 + 256);
    }

    #[test]
    fn empty_filename_is_sticky_no_file() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget::default();

        assert_eq!(fsm.start("", &mut target), Err(UploadError::NoFile));
        assert_eq!(fsm.phase(), UploadPhase::Errored);

        // Every subsequent call is a no-op reporting the same error.
        let mut chunk = valid_header();
        assert_eq!(
            fsm.chunk(&mut chunk, &mut target),
            Err(UploadError::NoFile)
        );
        assert_eq!(fsm.end(&mut target), Err(UploadError::NoFile));
        assert!(target.written.is_empty());
    }

    #[test]
    fn bad_magic_is_sticky_and_unchanged_by_later_chunks() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget::default();

        fsm.start("firmware.bin", &mut target).expect("start");
        let mut bogus = vec![0x00, 0x01, 0x02, 0x03];
        assert_eq!(
            fsm.chunk(&mut bogus, &mut target),
            Err(UploadError::BadMagic)
        );

        let mut good = valid_header();
        assert_eq!(
            fsm.chunk(&mut good, &mut target),
            Err(UploadError::BadMagic)
        );
        assert_eq!(fsm.error(), Some(UploadError::BadMagic));
        assert!(target.written.is_empty());
    }

    #[test]
    fn oversized_image_claim_is_rejected() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget {
            flash_size: 1024 * 1024,
            ..FakeTarget::default()
        };

        fsm.start("firmware.bin", &mut target).expect("start");
        // Size nibble 0x9 claims 16MB against a 1MB device.
        let mut first = vec![IMAGE_MAGIC, 0x02, 0xFF, 0x90];
        assert_eq!(
            fsm.chunk(&mut first, &mut target),
            Err(UploadError::FlashSizeTooLarge)
        );
    }

    #[test]
    fn short_write_becomes_write_mismatch() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget::default();

        fsm.start("firmware.bin", &mut target).expect("start");
        let mut first = valid_header();
        fsm.chunk(&mut first, &mut target).expect("first chunk");

        target.short_write = true;
        let mut more = vec![0u8; 64];
        assert_eq!(
            fsm.chunk(&mut more, &mut target),
            Err(UploadError::WriteMismatch)
        );
        assert_eq!(fsm.phase(), UploadPhase::Errored);
    }

    #[test]
    fn begin_failure_reports_insufficient_space() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget {
            fail_begin: true,
            ..FakeTarget::default()
        };
        assert_eq!(
            fsm.start("firmware.bin", &mut target),
            Err(UploadError::InsufficientSpace)
        );
    }

    #[test]
    fn finalize_failure_reports_finalize_failed() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget {
            fail_finalize: true,
            ..FakeTarget::default()
        };

        fsm.start("firmware.bin", &mut target).expect("start");
        let mut first = valid_header();
        fsm.chunk(&mut first, &mut target).expect("first chunk");
        assert_eq!(fsm.end(&mut target), Err(UploadError::FinalizeFailed));
    }

    #[test]
    fn abort_closes_region_and_sticks() {
        let mut fsm = UploadStateMachine::new();
        let mut target = FakeTarget::default();

        fsm.start("firmware.bin", &mut target).expect("start");
        fsm.abort(&mut target);
        assert!(target.aborted);
        assert_eq!(fsm.phase(), UploadPhase::Aborted);

        let mut chunk = valid_header();
        assert_eq!(
            fsm.chunk(&mut chunk, &mut target),
            Err(UploadError::Aborted)
        );
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(UploadError::NoFile.code(), 1);
        assert_eq!(UploadError::InsufficientSpace.code(), 2);
        assert_eq!(UploadError::BadMagic.code(), 3);
        assert_eq!(UploadError::FlashSizeTooLarge.code(), 4);
        assert_eq!(UploadError::WriteMismatch.code(), 5);
        assert_eq!(UploadError::FinalizeFailed.code(), 6);
        assert_eq!(UploadError::Aborted.code(), 7);
    }
}
