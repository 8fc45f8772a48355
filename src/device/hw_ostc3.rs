//! Heinrichs Weikamp OSTC3 downloader.
//!
//! Echo-framed single-byte commands: the device echoes every command byte
//! and answers `READY` (0x4D) after each completed exchange, except for
//! the `EXIT` terminator. Dive headers live in a 256-slot array of
//! 256-byte records carrying a monotonically increasing dive number.
//!
//! The device is a small state machine: `Open` until the first command,
//! then `Download` or `Service`. Service mode can fall back to download
//! mode, but not the other way around, and flashing firmware leaves the
//! device `Rebooting`.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

pub(crate) const INIT: u8 = 0xBB;
pub(crate) const EXIT: u8 = 0xFF;
pub(crate) const READY: u8 = 0x4D;

const CMD_IDENTITY: u8 = 0x69;
const CMD_HEADERS: u8 = 0x61;
const CMD_DIVE: u8 = 0x66;
const CMD_CLOCK: u8 = 0x62;
const CMD_DISPLAY: u8 = 0x6E;
const CMD_SERVICE: u8 = 0xAA;
const CMD_FLASH: u8 = 0x50;

const SERVICE_KEY: [u8; 3] = [0xAB, 0xCD, 0xEF];

/// 256 slots of 256 bytes each.
pub(crate) const SZ_HEADER: usize = 0x100;
pub(crate) const NUM_HEADERS: usize = 0x100;

pub(crate) const FP_SIZE: usize = 5;

/// Offset of the 24-bit profile length inside a header slot.
pub(crate) const HDR_PROFILE_LEN: usize = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Download,
    Service,
    Rebooting,
}

pub struct Ostc3Device {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    state: State,
}

impl Ostc3Device {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            115200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::HwOstc3),
            stream,
            state: State::Open,
        })
    }

    /// Echo-framed exchange: command byte, echo, optional payload out,
    /// response in, trailing ready byte.
    fn transfer(
        &mut self,
        cmd: u8,
        params: &[u8],
        answer: &mut [u8],
    ) -> Result<()> {
        self.base.check_cancelled()?;

        self.stream.write_all(&[cmd])?;
        let mut echo = [0u8; 1];
        self.stream.read_exact(&mut echo)?;
        if echo[0] != cmd {
            return Err(Error::Protocol("command echo mismatch"));
        }

        if !params.is_empty() {
            self.stream.write_all(params)?;
        }
        if !answer.is_empty() {
            self.stream.read_exact(answer)?;
        }

        if cmd != EXIT {
            let mut ready = [0u8; 1];
            self.stream.read_exact(&mut ready)?;
            if ready[0] != READY {
                return Err(Error::Protocol("missing ready byte"));
            }
        }
        Ok(())
    }

    fn enter_download(&mut self) -> Result<()> {
        match self.state {
            State::Download => return Ok(()),
            State::Open | State::Service => {}
            State::Rebooting => return Err(Error::InvalidArgs("device is rebooting")),
        }
        self.transfer(INIT, &[], &mut [])?;
        self.state = State::Download;
        self.identify()
    }

    /// Enter the service state. Reachable from `Open` only; a downloading
    /// device must be closed and reopened first.
    pub fn enter_service(&mut self) -> Result<()> {
        match self.state {
            State::Service => return Ok(()),
            State::Open => {}
            State::Download => {
                return Err(Error::InvalidArgs("service mode unreachable from download"));
            }
            State::Rebooting => return Err(Error::InvalidArgs("device is rebooting")),
        }
        let mut echo = [0u8; 3];
        self.transfer(CMD_SERVICE, &SERVICE_KEY, &mut echo)?;
        if echo != SERVICE_KEY {
            return Err(Error::Protocol("service key not accepted"));
        }
        self.state = State::Service;
        self.identify()
    }

    fn identify(&mut self) -> Result<()> {
        let mut identity = [0u8; 16];
        self.transfer(CMD_IDENTITY, &[], &mut identity)?;
        self.base.set_devinfo(DevInfo {
            model: identity[0] as u32,
            firmware: bytes::u16_be(&identity[2..4]) as u32,
            serial: bytes::u16_le(&identity[4..6]) as u32,
        });
        Ok(())
    }

    /// Write a line of text to the device display (download or service).
    pub fn display(&mut self, text: &str) -> Result<()> {
        if self.state == State::Open {
            self.enter_download()?;
        }
        let mut payload: Vec<u8> = text.bytes().filter(u8::is_ascii).take(15).collect();
        payload.push(0x00);
        self.transfer(CMD_DISPLAY, &payload, &mut [])
    }

    /// Synchronize the device clock to the host.
    pub fn set_clock(&mut self, datetime: jiff::civil::DateTime) -> Result<()> {
        if self.state == State::Open {
            self.enter_download()?;
        }
        let payload = [
            datetime.hour() as u8,
            datetime.minute() as u8,
            datetime.second() as u8,
            datetime.month() as u8,
            datetime.day() as u8,
            (datetime.year() - 2000) as u8,
        ];
        self.transfer(CMD_CLOCK, &payload, &mut [])
    }

    /// Flash a decrypted firmware image; service state only. The device
    /// reboots afterwards and the session is over.
    pub fn flash_firmware(&mut self, firmware: &firmware::Firmware) -> Result<()> {
        if self.state != State::Service {
            return Err(Error::InvalidArgs("firmware upgrade requires service mode"));
        }
        let image = firmware.image();
        let mut params = Vec::with_capacity(4 + image.len());
        params.extend_from_slice(&(image.len() as u32).to_le_bytes());
        params.extend_from_slice(image);
        self.transfer(CMD_FLASH, &params, &mut [])?;
        self.state = State::Rebooting;
        Ok(())
    }
}

/// Locate the newest header slot and count the populated ones.
///
/// Returns `(latest, count)`: the slot holding the highest internal dive
/// number, and how many slots are in use. Empty slots are all-0xFF.
pub(crate) fn scan_headers(headers: &[u8]) -> Result<(usize, usize)> {
    if headers.len() < NUM_HEADERS * SZ_HEADER {
        return Err(Error::DataFormat("header area truncated"));
    }
    let mut latest = 0;
    let mut highest: Option<u16> = None;
    let mut count = 0;
    for slot in 0..NUM_HEADERS {
        let header = &headers[slot * SZ_HEADER..(slot + 1) * SZ_HEADER];
        if bytes::is_all(&header[..2], 0xFF) {
            continue;
        }
        count += 1;
        let number = bytes::u16_le(&header[..2]);
        if highest.is_none_or(|h| number > h) {
            highest = Some(number);
            latest = slot;
        }
    }
    Ok((latest, count))
}

impl Device for Ostc3Device {
    fn family(&self) -> Family {
        self.base.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.base.devinfo()
    }

    fn canceller(&self) -> Canceller {
        self.base.canceller()
    }

    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()> {
        self.base.set_fingerprint(fingerprint, FP_SIZE)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        self.enter_download()?;

        let mut headers = vec![0u8; NUM_HEADERS * SZ_HEADER];
        let mut progress = Progress::new((NUM_HEADERS * SZ_HEADER) as u32);
        self.transfer(CMD_HEADERS, &[], &mut headers)?;
        let (latest, count) = scan_headers(&headers)?;

        // Size the real transfer before pulling any profile.
        let mut slots = Vec::with_capacity(count);
        let mut total = 0u32;
        let mut slot = latest;
        for _ in 0..count {
            let header = &headers[slot * SZ_HEADER..(slot + 1) * SZ_HEADER];
            if !bytes::is_all(&header[..2], 0xFF) {
                let profile_len = bytes::u24_le(&header[HDR_PROFILE_LEN..]);
                slots.push((slot, profile_len));
                total += SZ_HEADER as u32 + profile_len;
            }
            slot = (slot + NUM_HEADERS - 1) % NUM_HEADERS;
        }
        progress.refine_maximum(&self.base, total);

        for (slot, profile_len) in slots {
            self.base.check_cancelled()?;
            let header = headers[slot * SZ_HEADER..(slot + 1) * SZ_HEADER].to_vec();
            let fingerprint = &header[..FP_SIZE];
            if self.base.fingerprint_reached(fingerprint) {
                break;
            }

            let mut dive = vec![0u8; SZ_HEADER + profile_len as usize];
            self.transfer(CMD_DIVE, &[slot as u8], &mut dive)?;
            progress.advance(&self.base, SZ_HEADER as u32 + profile_len);

            // The device duplicates the header in front of the profile.
            if dive[..SZ_HEADER] != header[..] {
                return Err(Error::DataFormat("profile header disagrees with logbook"));
            }
            if !callback(RawDive {
                data: &dive,
                fingerprint,
            }) {
                return Ok(());
            }
        }
        progress.finish(&self.base);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            State::Download | State::Service => {
                self.transfer(EXIT, &[], &mut [])?;
            }
            State::Open | State::Rebooting => {}
        }
        self.state = State::Open;
        Ok(())
    }
}

/// Firmware images ship AES-encrypted; the cipher runs in ECB over
/// successive counter blocks, producing a keystream that is XORed with
/// the payload. A fletcher-style checksum trails the ciphertext.
pub mod firmware {
    use aes::Aes128;
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    use crate::checksum;
    use crate::error::{Error, Result};

    const BLOCK: usize = 16;

    /// A verified, decrypted firmware image ready for flashing.
    pub struct Firmware {
        image: Vec<u8>,
    }

    impl Firmware {
        pub fn image(&self) -> &[u8] {
            &self.image
        }
    }

    /// Decrypt `[iv 16][ciphertext…][fletcher16 2]` and verify the
    /// checksum over the plaintext.
    pub fn decrypt(data: &[u8], key: &[u8; 16]) -> Result<Firmware> {
        if data.len() < BLOCK + 2 {
            return Err(Error::DataFormat("firmware file truncated"));
        }
        let (iv, rest) = data.split_at(BLOCK);
        let (ciphertext, trailer) = rest.split_at(rest.len() - 2);

        let cipher = Aes128::new(GenericArray::from_slice(key));
        let mut image = Vec::with_capacity(ciphertext.len());
        for (index, chunk) in ciphertext.chunks(BLOCK).enumerate() {
            let mut counter = [0u8; BLOCK];
            counter.copy_from_slice(iv);
            counter[BLOCK - 4..].copy_from_slice(&(index as u32).to_be_bytes());

            let mut block = GenericArray::clone_from_slice(&counter);
            cipher.encrypt_block(&mut block);
            for (i, &byte) in chunk.iter().enumerate() {
                image.push(byte ^ block[i]);
            }
        }

        let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
        if checksum::fletcher16(&image) != expected {
            return Err(Error::DataFormat("firmware checksum mismatch"));
        }
        Ok(Firmware { image })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
            let cipher = Aes128::new(GenericArray::from_slice(key));
            let mut out = iv.to_vec();
            for (index, chunk) in plain.chunks(BLOCK).enumerate() {
                let mut counter = *iv;
                counter[BLOCK - 4..].copy_from_slice(&(index as u32).to_be_bytes());
                let mut block = GenericArray::clone_from_slice(&counter);
                cipher.encrypt_block(&mut block);
                for (i, &byte) in chunk.iter().enumerate() {
                    out.push(byte ^ block[i]);
                }
            }
            out.extend_from_slice(&checksum::fletcher16(plain).to_be_bytes());
            out
        }

        #[test]
        fn test_decrypt_round_trip() {
            let key = [0x42u8; 16];
            let iv = [0x07u8; 16];
            let plain: Vec<u8> = (0u8..40).collect();
            let file = encrypt(&plain, &key, &iv);

            let firmware = decrypt(&file, &key).unwrap();
            assert_eq!(firmware.image(), &plain[..]);
        }

        #[test]
        fn test_corrupted_image_fails_checksum() {
            let key = [0x42u8; 16];
            let iv = [0x07u8; 16];
            let plain: Vec<u8> = (0u8..40).collect();
            let mut file = encrypt(&plain, &key, &iv);
            file[20] ^= 0x01;

            assert!(matches!(decrypt(&file, &key), Err(Error::DataFormat(_))));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::FakePort;

    pub(crate) fn build_headers(slots: &[(usize, u16)]) -> Vec<u8> {
        let mut headers = vec![0xFFu8; NUM_HEADERS * SZ_HEADER];
        for &(slot, number) in slots {
            let base = slot * SZ_HEADER;
            headers[base..base + SZ_HEADER].fill(0);
            headers[base..base + 2].copy_from_slice(&number.to_le_bytes());
            // date bytes, part of the fingerprint
            headers[base + 2] = 24;
            headers[base + 3] = slot as u8;
            headers[base + 4] = number as u8;
            // zero-length profile unless the test patches it
        }
        headers
    }

    #[test]
    fn test_scan_headers_latest_and_count() {
        // Slot 3 holds number 7 (highest), slot 2 number 5.
        let headers = build_headers(&[(2, 0x0005), (3, 0x0007)]);
        let (latest, count) = scan_headers(&headers).unwrap();
        assert_eq!(latest, 3);
        assert_eq!(count, 2);
    }

    fn expect_cmd(port: &mut FakePort, cmd: u8, params: &[u8], answer: &[u8], ready: bool) {
        // The echo comes back before any parameter bytes go out, so the
        // exchange scripts as two entries when there are parameters.
        if params.is_empty() {
            let mut response = vec![cmd];
            response.extend_from_slice(answer);
            if ready {
                response.push(READY);
            }
            port.expect(&[cmd], &response);
        } else {
            port.expect(&[cmd], &[cmd]);
            let mut response = answer.to_vec();
            if ready {
                response.push(READY);
            }
            port.expect(params, &response);
        }
    }

    fn identity_answer() -> Vec<u8> {
        let mut identity = vec![0u8; 16];
        identity[0] = 0x0A;
        identity[2..4].copy_from_slice(&[0x01, 0x5B]);
        identity[4..6].copy_from_slice(&0x1234u16.to_le_bytes());
        identity
    }

    #[test]
    fn test_foreach_walks_backward_from_latest() {
        let headers = build_headers(&[(2, 0x0005), (3, 0x0007)]);

        let mut port = FakePort::new();
        expect_cmd(&mut port, INIT, &[], &[], true);
        expect_cmd(&mut port, CMD_IDENTITY, &[], &identity_answer(), true);
        expect_cmd(&mut port, CMD_HEADERS, &[], &headers, true);
        // Dive replies duplicate the logbook header, empty profiles.
        expect_cmd(
            &mut port,
            CMD_DIVE,
            &[3],
            &headers[3 * SZ_HEADER..4 * SZ_HEADER],
            true,
        );
        expect_cmd(
            &mut port,
            CMD_DIVE,
            &[2],
            &headers[2 * SZ_HEADER..3 * SZ_HEADER],
            true,
        );

        let context = Context::new();
        let mut device = Ostc3Device::open(&context, Box::new(port)).unwrap();

        let mut order = Vec::new();
        device
            .foreach(&mut |raw| {
                order.push(raw.data[3]); // slot marker byte from the header
                true
            })
            .unwrap();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn test_download_cannot_enter_service() {
        let headers = build_headers(&[]);

        let mut port = FakePort::new();
        expect_cmd(&mut port, INIT, &[], &[], true);
        expect_cmd(&mut port, CMD_IDENTITY, &[], &identity_answer(), true);
        expect_cmd(&mut port, CMD_HEADERS, &[], &headers, true);

        let context = Context::new();
        let mut device = Ostc3Device::open(&context, Box::new(port)).unwrap();
        device.foreach(&mut |_| true).unwrap();

        assert!(matches!(
            device.enter_service(),
            Err(Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_close_sends_exit_without_ready() {
        let mut port = FakePort::new();
        expect_cmd(&mut port, INIT, &[], &[], true);
        expect_cmd(&mut port, CMD_IDENTITY, &[], &identity_answer(), true);
        expect_cmd(&mut port, CMD_HEADERS, &[], &build_headers(&[]), true);
        expect_cmd(&mut port, EXIT, &[], &[], false);

        let context = Context::new();
        let mut device = Ostc3Device::open(&context, Box::new(port)).unwrap();
        device.foreach(&mut |_| true).unwrap();
        device.close().unwrap();
    }
}
