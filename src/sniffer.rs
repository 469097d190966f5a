//! Capture-file side of the sniffer collaborator: pcap file naming,
//! size/count rotation and the start/stop marker record. The capture
//! feed itself arrives from outside; this module only owns the files.

use crate::errors::{errno_h2rpc, TarpcError, TarpcResult};
use crate::log::LogWarn;
use crate::util;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65535;
const LINKTYPE_ETHERNET: u32 = 1;

const ETHERTYPE_IPV4: u16 = 0x0800;
const MARKER_PROTO: u8 = 0x3D;

/// What happens when the size or count ceiling is hit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Overflow {
    /// Delete the oldest file and keep capturing.
    DropOldest,
    /// Stop opening new files; further frames are discarded.
    BlockNew,
}

#[derive(Clone, Debug)]
pub struct SnifferConf {
    pub dir: PathBuf,
    /// File-name stem; empty means "use the numeric session offset".
    pub template: String,
    pub session_offset: u64,
    /// Per-file byte ceiling before rotation.
    pub file_size: u64,
    /// Count and total-size ceilings across all files of this sniffer.
    pub max_files: usize,
    pub total_size: u64,
    pub overflow: Overflow,
    /// Payload of the start/stop marker record.
    pub marker: String,
}

impl Default for SnifferConf {
    fn default() -> SnifferConf {
        SnifferConf {
            dir: std::env::temp_dir(),
            template: String::new(),
            session_offset: 0,
            file_size: 16 * 1024 * 1024,
            max_files: 8,
            total_size: 256 * 1024 * 1024,
            overflow: Overflow::DropOldest,
            marker: String::new(),
        }
    }
}

pub struct Sniffer {
    conf: SnifferConf,
    seq: u32,
    cur: Option<File>,
    cur_path: PathBuf,
    cur_size: u64,
    done: VecDeque<(PathBuf, u64)>,
    blocked: bool,
}

fn io_err(e: std::io::Error) -> TarpcError {
    TarpcError::Os(errno_h2rpc(e.raw_os_error().unwrap_or(libc::EIO)))
}

/// An Ethernet+IPv4 pseudo-packet carrying `text`; recognizable by the
/// reserved protocol byte, never mistaken for captured traffic.
pub fn marker_packet(text: &str) -> Vec<u8> {
    let payload = text.as_bytes();
    let ip_len = 20 + payload.len();
    let mut pkt = Vec::with_capacity(14 + ip_len);

    pkt.extend_from_slice(&[0u8; 12]);
    pkt.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    pkt.push(0x45); // version 4, ihl 5
    pkt.push(0);
    pkt.extend_from_slice(&(ip_len as u16).to_be_bytes());
    pkt.extend_from_slice(&[0u8; 4]); // id, frag
    pkt.push(64); // ttl
    pkt.push(MARKER_PROTO);
    pkt.extend_from_slice(&[0u8; 2]); // checksum, unused
    pkt.extend_from_slice(&[0u8; 8]); // src, dst
    pkt.extend_from_slice(payload);
    pkt
}

pub fn is_marker(frame: &[u8]) -> bool {
    frame.len() >= 24
        && frame[12..14] == ETHERTYPE_IPV4.to_be_bytes()
        && frame[14] >> 4 == 4
        && frame[23] == MARKER_PROTO
}

impl Sniffer {
    pub fn new(conf: SnifferConf) -> Sniffer {
        Sniffer {
            conf,
            seq: 0,
            cur: None,
            cur_path: PathBuf::new(),
            cur_size: 0,
            done: VecDeque::new(),
            blocked: false,
        }
    }

    fn stem(&self) -> String {
        if self.conf.template.is_empty() {
            self.conf.session_offset.to_string()
        } else {
            self.conf.template.clone()
        }
    }

    pub fn file_path(&self, seq: u32) -> PathBuf {
        self.conf.dir.join(format!("{}_{}.pcap", self.stem(), seq))
    }

    fn total_bytes(&self) -> u64 {
        self.done.iter().map(|(_, sz)| sz).sum::<u64>() + self.cur_size
    }

    /// Ceiling enforcement before a new file opens. Returns false when
    /// the policy says no more files.
    fn make_room(&mut self) -> TarpcResult<bool> {
        loop {
            let over_count = self.done.len() + 1 > self.conf.max_files;
            let over_size = self.total_bytes() >= self.conf.total_size;
            if !over_count && !over_size {
                return Ok(true);
            }
            match self.conf.overflow {
                Overflow::BlockNew => {
                    if !self.blocked {
                        log!(LogWarn, "capture ceiling reached, new files blocked");
                        self.blocked = true;
                    }
                    return Ok(false);
                }
                Overflow::DropOldest => match self.done.pop_front() {
                    Some((path, _)) => {
                        std::fs::remove_file(&path).map_err(io_err)?;
                    }
                    None => return Ok(true),
                },
            }
        }
    }

    fn open_next(&mut self) -> TarpcResult<bool> {
        if !self.make_room()? {
            return Ok(false);
        }
        let path = self.file_path(self.seq);
        self.seq += 1;
        let mut f = File::create(&path).map_err(io_err)?;

        let mut hdr = Vec::with_capacity(24);
        hdr.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        hdr.extend_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
        hdr.extend_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
        hdr.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        hdr.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        hdr.extend_from_slice(&PCAP_SNAPLEN.to_le_bytes());
        hdr.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
        f.write_all(&hdr).map_err(io_err)?;

        self.cur = Some(f);
        self.cur_path = path;
        self.cur_size = 24;
        self.write_record(&marker_packet(&self.conf.marker))?;
        Ok(true)
    }

    fn write_record(&mut self, frame: &[u8]) -> TarpcResult<()> {
        let f = match self.cur.as_mut() {
            Some(f) => f,
            None => return Ok(()),
        };
        let tv = util::gettimeofday();
        let mut rec = Vec::with_capacity(16 + frame.len());
        rec.extend_from_slice(&(tv.tv_sec as u32).to_le_bytes());
        rec.extend_from_slice(&(tv.tv_usec as u32).to_le_bytes());
        rec.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        rec.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        rec.extend_from_slice(frame);
        f.write_all(&rec).map_err(io_err)?;
        self.cur_size += rec.len() as u64;
        Ok(())
    }

    /// Ends the current file with the stop marker and retires it.
    fn close_current(&mut self) -> TarpcResult<()> {
        if self.cur.is_none() {
            return Ok(());
        }
        self.write_record(&marker_packet(&self.conf.marker))?;
        self.cur = None;
        self.done
            .push_back((std::mem::take(&mut self.cur_path), self.cur_size));
        self.cur_size = 0;
        Ok(())
    }

    pub fn start(&mut self) -> TarpcResult<()> {
        self.open_next().map(|_| ())
    }

    /// Appends one captured frame, rotating when the per-file ceiling
    /// would be crossed. Frames are dropped once block-new kicks in.
    pub fn push_frame(&mut self, frame: &[u8]) -> TarpcResult<()> {
        if self.cur.is_none() {
            if self.blocked || !self.open_next()? {
                return Ok(());
            }
        }
        // Room for the frame plus the stop marker.
        let marker_len = 16 + marker_packet(&self.conf.marker).len() as u64;
        if self.cur_size + 16 + frame.len() as u64 + marker_len > self.conf.file_size {
            self.close_current()?;
            if !self.open_next()? {
                return Ok(());
            }
        }
        self.write_record(frame)
    }

    pub fn stop(&mut self) -> TarpcResult<()> {
        self.close_current()
    }

    /// Finished files, oldest first.
    pub fn files(&self) -> Vec<&Path> {
        self.done.iter().map(|(p, _)| p.as_path()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_records(path: &Path) -> Vec<Vec<u8>> {
        let data = std::fs::read(path).unwrap();
        assert!(data.len() >= 24);
        assert_eq!(u32::from_le_bytes([data[0], data[1], data[2], data[3]]), PCAP_MAGIC);
        let mut recs = Vec::new();
        let mut off = 24;
        while off < data.len() {
            assert!(off + 16 <= data.len(), "truncated record header");
            let incl = u32::from_le_bytes([
                data[off + 8],
                data[off + 9],
                data[off + 10],
                data[off + 11],
            ]) as usize;
            assert!(off + 16 + incl <= data.len(), "truncated record body");
            recs.push(data[off + 16..off + 16 + incl].to_vec());
            off += 16 + incl;
        }
        recs
    }

    fn conf(dir: &Path) -> SnifferConf {
        SnifferConf {
            dir: dir.to_path_buf(),
            template: "cap".to_owned(),
            marker: "session boundary".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn markers_bracket_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Sniffer::new(conf(dir.path()));
        s.start().unwrap();
        s.push_frame(&[0u8; 60]).unwrap();
        s.push_frame(&[1u8; 100]).unwrap();
        s.stop().unwrap();

        let recs = read_records(&dir.path().join("cap_0.pcap"));
        assert_eq!(recs.len(), 4);
        assert!(is_marker(&recs[0]));
        assert!(is_marker(recs.last().unwrap()));
        assert!(!is_marker(&recs[1]));
        assert_eq!(&recs[0][34..], b"session boundary");
    }

    #[test]
    fn file_size_ceiling_rotates_with_sequential_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = conf(dir.path());
        c.file_size = 300;
        let mut s = Sniffer::new(c);
        s.start().unwrap();
        for _ in 0..6 {
            s.push_frame(&[0u8; 80]).unwrap();
        }
        s.stop().unwrap();

        assert!(s.files().len() >= 2);
        assert!(dir.path().join("cap_0.pcap").exists());
        assert!(dir.path().join("cap_1.pcap").exists());
        for f in s.files() {
            let recs = read_records(f);
            assert!(is_marker(&recs[0]));
            assert!(is_marker(recs.last().unwrap()));
        }
    }

    #[test]
    fn drop_oldest_deletes_the_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = conf(dir.path());
        c.file_size = 300;
        c.max_files = 2;
        let mut s = Sniffer::new(c);
        s.start().unwrap();
        for _ in 0..20 {
            s.push_frame(&[0u8; 80]).unwrap();
        }
        s.stop().unwrap();

        assert!(s.files().len() <= 2);
        assert!(!dir.path().join("cap_0.pcap").exists());
    }

    #[test]
    fn block_new_stops_creating_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = conf(dir.path());
        c.file_size = 300;
        c.max_files = 2;
        c.overflow = Overflow::BlockNew;
        let mut s = Sniffer::new(c);
        s.start().unwrap();
        for _ in 0..20 {
            s.push_frame(&[0u8; 80]).unwrap();
        }
        s.stop().unwrap();

        let made: Vec<_> = (0..10).filter(|i| dir.path().join(format!("cap_{}.pcap", i)).exists()).collect();
        assert_eq!(made.len(), 2);
    }

    #[test]
    fn empty_template_falls_back_to_the_session_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = conf(dir.path());
        c.template = String::new();
        c.session_offset = 4242;
        let s = Sniffer::new(c);
        assert_eq!(
            s.file_path(3),
            dir.path().join("4242_3.pcap")
        );
    }
}
