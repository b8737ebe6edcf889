//! Host-side syscall adapter.
//!
//! When the run loop detects a PC in the reserved window it hands the routine
//! number and the scalar register file to this adapter, which marshals
//! arguments out of R1-R3, performs the host operation and writes results
//! back (R1, and R2 for the 64-bit time result). Guest file descriptors 0-2
//! are the simulator's stdio and are never closed; descriptors from OPEN are
//! allocated from 3 upward in a translation table.
//!
//! Host-level failures surface to the guest as a -1 return code, never as a
//! simulator fault. Only an out-of-range routine number (or a bad guest
//! pointer) aborts the run.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cpu::state::ScalarRegisterFile;
use crate::cpu::SimError;
use crate::ram::Ram;

/// Simulator routines, indexed by `(PC - 0xffff_0000) >> 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    Exit = 0,
    Putchar = 1,
    Getchar = 2,
    Close = 3,
    Fstat = 4,
    Isatty = 5,
    Link = 6,
    Lseek = 7,
    Mkdir = 8,
    Open = 9,
    Read = 10,
    Stat = 11,
    Unlink = 12,
    Write = 13,
    GetTimeMicros = 14,
}

impl Routine {
    pub fn from_no(no: u32) -> Option<Self> {
        Some(match no {
            0 => Routine::Exit,
            1 => Routine::Putchar,
            2 => Routine::Getchar,
            3 => Routine::Close,
            4 => Routine::Fstat,
            5 => Routine::Isatty,
            6 => Routine::Link,
            7 => Routine::Lseek,
            8 => Routine::Mkdir,
            9 => Routine::Open,
            10 => Routine::Read,
            11 => Routine::Stat,
            12 => Routine::Unlink,
            13 => Routine::Write,
            14 => Routine::GetTimeMicros,
            _ => return None,
        })
    }
}

/// Host service dispatcher.
pub struct Syscalls {
    ram: Arc<Ram>,
    terminate: bool,
    exit_code: u32,
    files: HashMap<u32, File>,
    next_fd: u32,
}

impl Syscalls {
    pub fn new(ram: Arc<Ram>) -> Self {
        Self {
            ram,
            terminate: false,
            exit_code: 0,
            files: HashMap::new(),
            next_fd: 3,
        }
    }

    /// Clear the run state (open files stay open across resets).
    pub fn clear(&mut self) {
        self.terminate = false;
        self.exit_code = 0;
    }

    /// True once a call requested termination.
    pub fn terminate(&self) -> bool {
        self.terminate
    }

    /// The exit code recorded by the EXIT routine.
    pub fn exit_code(&self) -> u32 {
        self.exit_code
    }

    /// Dispatch one routine against the current register state.
    pub fn call(&mut self, routine_no: u32, regs: &mut ScalarRegisterFile) -> Result<(), SimError> {
        let routine = Routine::from_no(routine_no)
            .ok_or(SimError::SyscallFault { routine: routine_no })?;
        log::debug!("syscall {:?} r1=0x{:08x}", routine, regs.read(1));

        match routine {
            Routine::Exit => {
                self.terminate = true;
                self.exit_code = regs.read(1);
            }

            Routine::Putchar => {
                let c = regs.read(1) as u8;
                let rc = match io::stdout().write_all(&[c]).and_then(|_| io::stdout().flush()) {
                    Ok(()) => c as u32,
                    Err(_) => !0,
                };
                regs.write(1, rc);
            }

            Routine::Getchar => {
                let mut byte = [0u8; 1];
                let rc = match io::stdin().read(&mut byte) {
                    Ok(1) => byte[0] as u32,
                    _ => !0,
                };
                regs.write(1, rc);
            }

            Routine::Close => {
                let fd = regs.read(1);
                // Never close the simulator's stdio.
                let rc = if fd <= 2 || self.files.remove(&fd).is_some() {
                    0
                } else {
                    !0
                };
                regs.write(1, rc);
            }

            Routine::Fstat => {
                let fd = regs.read(1);
                let buf_ptr = regs.read(2);
                let rc = match self.host_fstat(fd) {
                    Some(stat) => {
                        self.stat_to_ram(&stat, buf_ptr)?;
                        0
                    }
                    None => !0,
                };
                regs.write(1, rc);
            }

            Routine::Isatty => {
                let rc = match regs.read(1) {
                    0 => io::stdin().is_terminal() as u32,
                    1 => io::stdout().is_terminal() as u32,
                    2 => io::stderr().is_terminal() as u32,
                    _ => 0,
                };
                regs.write(1, rc);
            }

            Routine::Link => {
                let old = self.path_to_host(regs.read(1))?;
                let new = self.path_to_host(regs.read(2))?;
                regs.write(1, rc_from(std::fs::hard_link(old, new)));
            }

            Routine::Lseek => {
                let fd = regs.read(1);
                let offset = regs.read(2) as i32;
                let whence = regs.read(3);
                let pos = match whence {
                    0 => SeekFrom::Start(offset as u32 as u64),
                    1 => SeekFrom::Current(offset as i64),
                    _ => SeekFrom::End(offset as i64),
                };
                let rc = match self.files.get_mut(&fd) {
                    Some(file) => match file.seek(pos) {
                        Ok(new_pos) => new_pos as u32,
                        Err(_) => !0,
                    },
                    None => !0,
                };
                regs.write(1, rc);
            }

            Routine::Mkdir => {
                let path = self.path_to_host(regs.read(1))?;
                regs.write(1, rc_from(std::fs::create_dir(path)));
            }

            Routine::Open => {
                let path = self.path_to_host(regs.read(1))?;
                let flags = regs.read(2);
                let rc = match open_options(flags).open(&path) {
                    Ok(file) => {
                        let fd = self.next_fd;
                        self.next_fd += 1;
                        self.files.insert(fd, file);
                        fd
                    }
                    Err(e) => {
                        log::warn!("open {:?} failed: {}", path, e);
                        !0
                    }
                };
                regs.write(1, rc);
            }

            Routine::Read => {
                let fd = regs.read(1);
                let buf_ptr = regs.read(2);
                let nbytes = regs.read(3);
                let rc = if !self.ram.valid_range(buf_ptr, nbytes) {
                    !0
                } else {
                    let mut buf = vec![0u8; nbytes as usize];
                    let result = match fd {
                        0 => io::stdin().read(&mut buf),
                        _ => match self.files.get_mut(&fd) {
                            Some(file) => file.read(&mut buf),
                            None => Err(io::ErrorKind::NotFound.into()),
                        },
                    };
                    match result {
                        Ok(n) => {
                            self.ram.write_bytes(buf_ptr, &buf[..n])?;
                            n as u32
                        }
                        Err(_) => !0,
                    }
                };
                regs.write(1, rc);
            }

            Routine::Stat => {
                let path = self.path_to_host(regs.read(1))?;
                let buf_ptr = regs.read(2);
                let rc = match std::fs::metadata(&path) {
                    Ok(meta) => {
                        self.stat_to_ram(&GuestStat::from_metadata(&meta), buf_ptr)?;
                        0
                    }
                    Err(_) => !0,
                };
                regs.write(1, rc);
            }

            Routine::Unlink => {
                let path = self.path_to_host(regs.read(1))?;
                regs.write(1, rc_from(std::fs::remove_file(path)));
            }

            Routine::Write => {
                let fd = regs.read(1);
                let buf_ptr = regs.read(2);
                let nbytes = regs.read(3);
                let rc = if !self.ram.valid_range(buf_ptr, nbytes) {
                    !0
                } else {
                    let buf = self.ram.read_bytes(buf_ptr, nbytes)?;
                    let result = match fd {
                        1 => io::stdout().write(&buf).and_then(|n| {
                            io::stdout().flush()?;
                            Ok(n)
                        }),
                        2 => io::stderr().write(&buf),
                        _ => match self.files.get_mut(&fd) {
                            Some(file) => file.write(&buf),
                            None => Err(io::ErrorKind::NotFound.into()),
                        },
                    };
                    match result {
                        Ok(n) => n as u32,
                        Err(_) => !0,
                    }
                };
                regs.write(1, rc);
            }

            Routine::GetTimeMicros => {
                let micros = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_micros() as u64)
                    .unwrap_or(0);
                regs.write(1, micros as u32);
                regs.write(2, (micros >> 32) as u32);
            }
        }

        Ok(())
    }

    /// Read a NUL-terminated guest string.
    fn path_to_host(&self, mut addr: u32) -> Result<String, SimError> {
        let mut result = String::new();
        loop {
            let c = self.ram.load8(addr)?;
            addr = addr.wrapping_add(1);
            if c == 0 {
                break;
            }
            result.push(c as u8 as char);
        }
        Ok(result)
    }

    fn host_fstat(&self, fd: u32) -> Option<GuestStat> {
        if fd <= 2 {
            // Stdio: report a character device.
            return Some(GuestStat {
                mode: 0x2000,
                blksize: 1024,
                ..Default::default()
            });
        }
        let meta = self.files.get(&fd)?.metadata().ok()?;
        Some(GuestStat::from_metadata(&meta))
    }

    /// Serialize the newlib 72-byte stat layout into guest RAM.
    fn stat_to_ram(&self, stat: &GuestStat, addr: u32) -> Result<(), SimError> {
        self.ram.store16(addr, stat.dev)?;
        self.ram.store16(addr + 2, stat.ino)?;
        self.ram.store32(addr + 4, stat.mode)?;
        self.ram.store16(addr + 8, stat.nlink)?;
        self.ram.store16(addr + 10, stat.uid)?;
        self.ram.store16(addr + 12, stat.gid)?;
        self.ram.store16(addr + 14, stat.rdev)?;
        self.ram.store32(addr + 16, stat.size)?;
        for (offset, (sec, nsec)) in [
            (20, stat.atim),
            (32, stat.mtim),
            (44, stat.ctim),
        ] {
            self.ram.store32(addr + offset, sec as u32)?;
            self.ram.store32(addr + offset + 4, (sec >> 32) as u32)?;
            self.ram.store32(addr + offset + 8, nsec)?;
        }
        self.ram.store32(addr + 56, stat.blksize)?;
        self.ram.store32(addr + 60, stat.blocks)?;
        Ok(())
    }
}

/// Host metadata reduced to the guest stat fields.
#[derive(Debug, Default)]
struct GuestStat {
    dev: u32,
    ino: u32,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    rdev: u32,
    size: u32,
    atim: (u64, u32),
    mtim: (u64, u32),
    ctim: (u64, u32),
    blksize: u32,
    blocks: u32,
}

impl GuestStat {
    #[cfg(unix)]
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev() as u32,
            ino: meta.ino() as u32,
            mode: meta.mode(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            size: meta.size() as u32,
            atim: (meta.atime() as u64, meta.atime_nsec() as u32),
            mtim: (meta.mtime() as u64, meta.mtime_nsec() as u32),
            ctim: (meta.ctime() as u64, meta.ctime_nsec() as u32),
            blksize: meta.blksize() as u32,
            blocks: meta.blocks() as u32,
        }
    }

    #[cfg(not(unix))]
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mode = if meta.is_dir() { 0x4000 } else { 0x8000 };
        Self {
            mode,
            size: meta.len() as u32,
            blksize: 1024,
            ..Default::default()
        }
    }
}

fn rc_from(result: io::Result<()>) -> u32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("syscall host operation failed: {}", e);
            !0
        }
    }
}

/// Translate the guest open flag bits to host open options.
///
/// Bits 0-1 select the access mode, bit 3 is APPEND, bit 9 is CREAT and
/// bit 10 is TRUNC.
fn open_options(flags: u32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags & 0x3 {
        1 => opts.write(true),
        2 => opts.read(true).write(true),
        _ => opts.read(true),
    };
    if flags & 0x0008 != 0 {
        opts.append(true);
    }
    if flags & 0x0200 != 0 {
        opts.create(true);
    }
    if flags & 0x0400 != 0 {
        opts.truncate(true);
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Ram>, Syscalls, ScalarRegisterFile) {
        let ram = Arc::new(Ram::new(0x10000));
        let syscalls = Syscalls::new(ram.clone());
        (ram, syscalls, ScalarRegisterFile::new())
    }

    fn temp_name(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("mr32_emu_{}_{}", std::process::id(), name))
            .to_string_lossy()
            .into_owned()
    }

    fn put_string(ram: &Ram, addr: u32, s: &str) {
        ram.write_bytes(addr, s.as_bytes()).unwrap();
        ram.store8(addr + s.len() as u32, 0).unwrap();
    }

    #[test]
    fn test_exit_records_code() {
        let (_ram, mut syscalls, mut regs) = setup();

        regs.write(1, 42);
        syscalls.call(Routine::Exit as u32, &mut regs).unwrap();
        assert!(syscalls.terminate());
        assert_eq!(syscalls.exit_code(), 42);

        syscalls.clear();
        assert!(!syscalls.terminate());
        assert_eq!(syscalls.exit_code(), 0);
    }

    #[test]
    fn test_invalid_routine_faults() {
        let (_ram, mut syscalls, mut regs) = setup();

        assert!(matches!(
            syscalls.call(99, &mut regs),
            Err(SimError::SyscallFault { routine: 99 })
        ));
    }

    #[test]
    fn test_close_preserves_stdio() {
        let (_ram, mut syscalls, mut regs) = setup();

        for fd in 0..3 {
            regs.write(1, fd);
            syscalls.call(Routine::Close as u32, &mut regs).unwrap();
            assert_eq!(regs.read(1), 0);
        }

        // Unknown descriptors report failure.
        regs.write(1, 17);
        syscalls.call(Routine::Close as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), !0);
    }

    #[test]
    fn test_open_write_read_roundtrip() {
        let (ram, mut syscalls, mut regs) = setup();
        let path = temp_name("sysfile.txt");
        put_string(&ram, 0x1000, &path);
        ram.write_bytes(0x2000, b"hello").unwrap();

        // open(path, WRONLY | CREAT | TRUNC)
        regs.write(1, 0x1000);
        regs.write(2, 0x0601);
        regs.write(3, 0o644);
        syscalls.call(Routine::Open as u32, &mut regs).unwrap();
        let fd = regs.read(1);
        assert!(fd >= 3);

        // write(fd, 0x2000, 5)
        regs.write(1, fd);
        regs.write(2, 0x2000);
        regs.write(3, 5);
        syscalls.call(Routine::Write as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 5);

        regs.write(1, fd);
        syscalls.call(Routine::Close as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 0);

        // Read it back through the guest interface.
        regs.write(1, 0x1000);
        regs.write(2, 0);
        regs.write(3, 0);
        syscalls.call(Routine::Open as u32, &mut regs).unwrap();
        let fd = regs.read(1);

        regs.write(1, fd);
        regs.write(2, 0x3000);
        regs.write(3, 16);
        syscalls.call(Routine::Read as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 5);
        assert_eq!(ram.read_bytes(0x3000, 5).unwrap(), b"hello");

        regs.write(1, fd);
        syscalls.call(Routine::Close as u32, &mut regs).unwrap();

        // unlink(path)
        regs.write(1, 0x1000);
        syscalls.call(Routine::Unlink as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 0);
    }

    #[test]
    fn test_read_write_range_check() {
        let (_ram, mut syscalls, mut regs) = setup();

        // Buffer extends past the end of RAM.
        regs.write(1, 1);
        regs.write(2, 0xff00);
        regs.write(3, 0x1000);
        syscalls.call(Routine::Write as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), !0);

        regs.write(1, 0);
        regs.write(2, 0xff00);
        regs.write(3, 0x1000);
        syscalls.call(Routine::Read as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), !0);
    }

    #[test]
    fn test_stat_layout() {
        let (ram, mut syscalls, mut regs) = setup();
        let path = temp_name("statfile.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        put_string(&ram, 0x1000, &path);

        regs.write(1, 0x1000);
        regs.write(2, 0x4000);
        syscalls.call(Routine::Stat as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 0);

        // Size at offset 16, regular-file mode bit at offset 4.
        assert_eq!(ram.load32(0x4010).unwrap(), 10);
        assert_ne!(ram.load32(0x4004).unwrap() & 0x8000, 0);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_fstat_stdio_is_char_device() {
        let (ram, mut syscalls, mut regs) = setup();

        regs.write(1, 1);
        regs.write(2, 0x4000);
        syscalls.call(Routine::Fstat as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 0);
        assert_eq!(ram.load32(0x4004).unwrap(), 0x2000);
        assert_eq!(ram.load32(0x4038).unwrap(), 1024);
    }

    #[test]
    fn test_gettimemicros() {
        let (_ram, mut syscalls, mut regs) = setup();

        syscalls.call(Routine::GetTimeMicros as u32, &mut regs).unwrap();
        let micros = regs.read(1) as u64 | ((regs.read(2) as u64) << 32);
        // Sometime after 2020-01-01 in microseconds.
        assert!(micros > 1_577_000_000_000_000);
    }

    #[test]
    fn test_lseek() {
        let (ram, mut syscalls, mut regs) = setup();
        let path = temp_name("seekfile.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        put_string(&ram, 0x1000, &path);

        regs.write(1, 0x1000);
        regs.write(2, 0);
        syscalls.call(Routine::Open as u32, &mut regs).unwrap();
        let fd = regs.read(1);

        // SEEK_SET 4
        regs.write(1, fd);
        regs.write(2, 4);
        regs.write(3, 0);
        syscalls.call(Routine::Lseek as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 4);

        // SEEK_END -2 lands at 8.
        regs.write(1, fd);
        regs.write(2, -2i32 as u32);
        regs.write(3, 2);
        syscalls.call(Routine::Lseek as u32, &mut regs).unwrap();
        assert_eq!(regs.read(1), 8);

        regs.write(1, fd);
        syscalls.call(Routine::Close as u32, &mut regs).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_flag_translation() {
        // Smoke-check the flag decoder against a real file: CREAT makes the
        // file, APPEND extends it.
        let (ram, mut syscalls, mut regs) = setup();
        let path = temp_name("appendfile.txt");
        put_string(&ram, 0x1000, &path);
        ram.write_bytes(0x2000, b"ab").unwrap();

        for _ in 0..2 {
            regs.write(1, 0x1000);
            regs.write(2, 0x0209); // WRONLY | APPEND | CREAT
            syscalls.call(Routine::Open as u32, &mut regs).unwrap();
            let fd = regs.read(1);
            regs.write(1, fd);
            regs.write(2, 0x2000);
            regs.write(3, 2);
            syscalls.call(Routine::Write as u32, &mut regs).unwrap();
            regs.write(1, fd);
            syscalls.call(Routine::Close as u32, &mut regs).unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"abab");
        std::fs::remove_file(&path).unwrap();
    }
}
