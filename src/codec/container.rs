use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use super::frame::{EncodedPacket, StreamInfo};
use super::pixel::PixelLayout;
use super::rational::Rational;
use super::Muxer;
use crate::utils::file_utils;

// Layout (little-endian):
//   "FRLY" u16 version, u16 width, u16 height,
//   u8 len + pixel format name, u8 len + codec name,
//   i32 fps num, i32 fps den, i32 time base num, i32 time base den
//   per packet: u8 0x01, i64 pts, i64 dts, u8 keyframe, u32 len, data
//   trailer:    u8 0xFF, u64 packet count
pub const MAGIC: &[u8; 4] = b"FRLY";
pub const VERSION: u16 = 1;
const PACKET_TAG: u8 = 0x01;
const TRAILER_TAG: u8 = 0xFF;

/// Muxer writing the framed container to a file
pub struct FileMuxer {
    path: PathBuf,
    writer: BufWriter<File>,
    packets: u64,
    bytes: u64,
    finished: bool,
}

impl FileMuxer {
    pub fn create(path: &Path) -> Result<Self> {
        file_utils::ensure_parent_dir(path)?;
        let file = File::create(path)
            .with_context(|| format!("Could not open output file: {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            packets: 0,
            bytes: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    fn put_name(&mut self, name: &str) -> Result<()> {
        let len = u8::try_from(name.len()).context("Name too long for container header")?;
        self.put(&[len])?;
        self.put(name.as_bytes())
    }
}

impl Muxer for FileMuxer {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()> {
        let width = u16::try_from(info.width).context("Width does not fit container header")?;
        let height = u16::try_from(info.height).context("Height does not fit container header")?;

        self.put(MAGIC)?;
        self.put(&VERSION.to_le_bytes())?;
        self.put(&width.to_le_bytes())?;
        self.put(&height.to_le_bytes())?;
        self.put_name(info.layout.name())?;
        self.put_name(&info.codec)?;
        for value in [info.fps.num, info.fps.den, info.time_base.num, info.time_base.den] {
            self.put(&value.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()> {
        let len = u32::try_from(packet.data.len()).context("Packet too large for container")?;
        self.put(&[PACKET_TAG])?;
        self.put(&packet.pts.to_le_bytes())?;
        self.put(&packet.dts.to_le_bytes())?;
        self.put(&[packet.keyframe as u8])?;
        self.put(&len.to_le_bytes())?;
        self.put(&packet.data)?;
        self.packets += 1;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.put(&[TRAILER_TAG])?;
        let count = self.packets;
        self.put(&count.to_le_bytes())?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))?;
        self.finished = true;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

/// Muxer for output "-": counts what would have been written
#[derive(Default)]
pub struct NullMuxer {
    packets: u64,
    bytes: u64,
}

impl NullMuxer {
    pub fn packets(&self) -> u64 {
        self.packets
    }
}

impl Muxer for NullMuxer {
    fn write_header(&mut self, _info: &StreamInfo) -> Result<()> {
        Ok(())
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()> {
        self.packets += 1;
        self.bytes += packet.data.len() as u64;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

/// Open the muxer named by an output target; "-" discards output
pub fn open_muxer(target: &str) -> Result<Box<dyn Muxer>> {
    if target == "-" {
        Ok(Box::new(NullMuxer::default()))
    } else {
        Ok(Box::new(FileMuxer::create(Path::new(target))?))
    }
}

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHeader {
    pub version: u16,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub codec: String,
    pub fps: Rational,
    pub time_base: Rational,
}

/// Everything read back from a container file
#[derive(Debug)]
pub struct Container {
    pub header: ContainerHeader,
    pub packets: Vec<EncodedPacket>,
    /// Packet count from the trailer; None when the file was cut short
    pub trailer_count: Option<u64>,
}

impl Container {
    pub fn is_complete(&self) -> bool {
        self.trailer_count == Some(self.packets.len() as u64)
    }
}

fn read_array<const N: usize>(reader: &mut impl Read) -> std::io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_name(reader: &mut impl Read) -> Result<String> {
    let [len] = read_array::<1>(reader)?;
    let mut name = vec![0u8; len as usize];
    reader.read_exact(&mut name)?;
    String::from_utf8(name).context("Container name is not UTF-8")
}

fn read_i32(reader: &mut impl Read) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}

pub fn read_container(path: &Path) -> Result<Container> {
    let file = File::open(path).with_context(|| format!("Failed to open container: {:?}", path))?;
    let mut reader = BufReader::new(file);

    let magic: [u8; 4] = read_array(&mut reader).context("Container too short")?;
    if &magic != MAGIC {
        bail!("{:?} is not a framerelay container", path);
    }
    let version = u16::from_le_bytes(read_array(&mut reader)?);
    if version != VERSION {
        bail!("Unsupported container version {}", version);
    }
    let width = u16::from_le_bytes(read_array(&mut reader)?) as u32;
    let height = u16::from_le_bytes(read_array(&mut reader)?) as u32;
    let layout: PixelLayout = read_name(&mut reader)?.parse()?;
    let codec = read_name(&mut reader)?;
    let fps = Rational::new(read_i32(&mut reader)?, read_i32(&mut reader)?);
    let time_base = Rational::new(read_i32(&mut reader)?, read_i32(&mut reader)?);

    let header = ContainerHeader {
        version,
        width,
        height,
        layout,
        codec,
        fps,
        time_base,
    };

    let mut packets = Vec::new();
    let mut trailer_count = None;
    loop {
        let tag = match read_array::<1>(&mut reader) {
            Ok([tag]) => tag,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        match tag {
            PACKET_TAG => match read_packet(&mut reader) {
                Ok(packet) => packets.push(packet),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    crate::utils::logger::info(&format!("{:?}: truncated packet at end", path));
                    break;
                }
                Err(e) => return Err(e.into()),
            },
            TRAILER_TAG => {
                match read_array(&mut reader) {
                    Ok(count) => trailer_count = Some(u64::from_le_bytes(count)),
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        crate::utils::logger::info(&format!("{:?}: truncated trailer", path));
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to read trailer of {:?}", path))
                    }
                }
                break;
            }
            other => bail!("Unexpected record tag 0x{:02x} in {:?}", other, path),
        }
    }

    Ok(Container {
        header,
        packets,
        trailer_count,
    })
}

fn read_packet(reader: &mut impl Read) -> std::io::Result<EncodedPacket> {
    let pts = i64::from_le_bytes(read_array(reader)?);
    let dts = i64::from_le_bytes(read_array(reader)?);
    let [keyframe] = read_array::<1>(reader)?;
    let len = u32::from_le_bytes(read_array(reader)?) as u64;
    // grow with the bytes actually present, not the declared length
    let mut data = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(ErrorKind::UnexpectedEof.into());
    }
    Ok(EncodedPacket {
        data,
        pts,
        dts,
        keyframe: keyframe != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> StreamInfo {
        StreamInfo {
            width: 640,
            height: 480,
            layout: PixelLayout::Yuv420p,
            codec: "lz4".to_string(),
            fps: Rational::new(30, 1),
            time_base: Rational::new(1, 30),
        }
    }

    fn write_three(path: &Path) -> u64 {
        let mut muxer = FileMuxer::create(path).unwrap();
        assert_eq!(muxer.path(), path);
        muxer.write_header(&info()).unwrap();
        for i in 0..3 {
            muxer
                .write_packet(&EncodedPacket {
                    data: vec![i as u8; 10 + i],
                    pts: i as i64,
                    dts: i as i64,
                    keyframe: i == 0,
                })
                .unwrap();
        }
        muxer.write_trailer().unwrap();
        muxer.write_trailer().unwrap();
        muxer.bytes_written()
    }

    fn cut_tail(path: &Path, bytes: u64) {
        let len = std::fs::metadata(path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_len(len - bytes).unwrap();
    }

    #[test]
    fn written_container_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.frly");
        let written = write_three(&path);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);

        let container = read_container(&path).unwrap();
        assert_eq!(container.header.width, 640);
        assert_eq!(container.header.layout, PixelLayout::Yuv420p);
        assert_eq!(container.header.codec, "lz4");
        assert_eq!(container.header.fps, Rational::new(30, 1));
        assert_eq!(container.packets.len(), 3);
        assert_eq!(container.packets[2].data, vec![2u8; 12]);
        assert!(container.packets[0].keyframe);
        assert!(!container.packets[1].keyframe);
        assert!(container.is_complete());
    }

    #[test]
    fn truncated_container_has_no_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.frly");
        {
            let mut muxer = FileMuxer::create(&path).unwrap();
            muxer.write_header(&info()).unwrap();
            muxer
                .write_packet(&EncodedPacket {
                    data: vec![7; 5],
                    pts: 0,
                    dts: 0,
                    keyframe: true,
                })
                .unwrap();
            muxer.writer.flush().unwrap();
        }

        let container = read_container(&path).unwrap();
        assert_eq!(container.packets.len(), 1);
        assert_eq!(container.trailer_count, None);
        assert!(!container.is_complete());
    }

    #[test]
    fn trailer_cut_mid_count_is_still_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut_trailer.frly");
        write_three(&path);
        cut_tail(&path, 4);

        let container = read_container(&path).unwrap();
        assert_eq!(container.packets.len(), 3);
        assert_eq!(container.trailer_count, None);
        assert!(!container.is_complete());
    }

    #[test]
    fn oversized_packet_length_stops_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_len.frly");
        {
            let mut muxer = FileMuxer::create(&path).unwrap();
            muxer.write_header(&info()).unwrap();
            muxer.put(&[PACKET_TAG]).unwrap();
            muxer.put(&0i64.to_le_bytes()).unwrap();
            muxer.put(&0i64.to_le_bytes()).unwrap();
            muxer.put(&[1]).unwrap();
            muxer.put(&u32::MAX.to_le_bytes()).unwrap();
            muxer.put(&[9; 16]).unwrap();
            muxer.writer.flush().unwrap();
        }

        let container = read_container(&path).unwrap();
        assert!(container.packets.is_empty());
        assert_eq!(container.trailer_count, None);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, b"RIFF0000").unwrap();
        assert!(read_container(&path).is_err());
    }

    #[test]
    fn null_muxer_counts() {
        let mut muxer = NullMuxer::default();
        muxer.write_header(&info()).unwrap();
        muxer
            .write_packet(&EncodedPacket {
                data: vec![0; 100],
                pts: 0,
                dts: 0,
                keyframe: true,
            })
            .unwrap();
        muxer.write_trailer().unwrap();
        assert_eq!(muxer.packets(), 1);
        assert_eq!(muxer.bytes_written(), 100);
    }

    #[test]
    fn dash_opens_the_null_muxer() {
        let mut muxer = open_muxer("-").unwrap();
        muxer.write_header(&info()).unwrap();
        muxer.write_trailer().unwrap();
        assert_eq!(muxer.bytes_written(), 0);
    }
}
