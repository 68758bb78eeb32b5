use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::audit::{AuditFilter, AuditLog, AuditRecord, AuditState, NewAuditRecord, RecordId};
use crate::error::{LifecycleError, Result};

const AUDIT_MAGIC: u32 = 0x3144_5541; // "AUD1"
const AUDIT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const FRAME_HEADER_LEN: u64 = 8;

pub const AUDIT_FILE_NAME: &str = "audit.wal";

fn checksum(data: &[u8]) -> u32 {
    // 轻量校验：足够发现截断/随机翻转，不是强校验。
    let mut s: u32 = 0;
    for &b in data {
        s = s.wrapping_add(b as u32);
        s = s.rotate_left(3);
    }
    s
}

#[derive(Clone, Debug, Default)]
pub struct AuditReplay {
    pub records: Vec<AuditRecord>,
    /// 最后一个完整 frame 之后的偏移（用于截掉坏尾巴）
    pub valid_len: u64,
    pub truncated_tail_records: usize,
}

struct Inner {
    file: File,
    state: AuditState,
    /// 最后一个已确认 frame 之后的文件长度；写失败时回滚到这里
    committed_len: u64,
    /// 回滚也失败：文件尾部状态未知，拒绝后续写入
    poisoned: bool,
    #[cfg(test)]
    fault: Option<WriteFault>,
}

/// 测试用写故障（一次性）
#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteFault {
    /// 只写出半个 frame 就报错
    ShortWrite,
    /// frame 完整写出，但 sync 报错
    SyncFailed,
    /// 半个 frame + 回滚（set_len）也失败
    ShortWriteNoRollback,
}

/// 持久化审计日志（append-only 文件）。
///
/// 布局：`[magic u32][version u32]` + 若干 `[len u32][checksum u32][json payload]`。
/// 打开时整体回放到内存；尾部截断/损坏的 frame 会被丢弃并从文件中截掉，
/// 之后的追加从最后一个完整 frame 处继续。
///
/// 追加是 "全有或全无"：write/flush/sync 任一步失败都会把文件截回上一个已确认长度，
/// 该条记录视为未写入（不分配 id，调用方收到 `AuditWrite`）。sync 失败前已经写出的
/// 字节同样被截掉。截断本身失败时日志进入 poisoned 状态，此后所有追加都报错。
pub struct WalAuditLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl WalAuditLog {
    pub fn open_in_dir(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(AUDIT_FILE_NAME))
    }

    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let replay = read_audit_file(&path)?;
        if replay.truncated_tail_records > 0 {
            tracing::warn!(
                "Audit log {:?}: dropped {} damaged tail record(s)",
                path,
                replay.truncated_tail_records
            );
        }

        let file = open_for_append(&path, replay.valid_len)?;
        let committed_len = replay.valid_len.max(HEADER_LEN);
        tracing::info!(
            "Audit log {:?} opened with {} record(s)",
            path,
            replay.records.len()
        );

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                state: AuditState::from_records(replay.records),
                committed_len,
                poisoned: false,
                #[cfg(test)]
                fault: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.lock().poisoned
    }

    #[cfg(test)]
    fn inject_fault(&self, fault: WriteFault) {
        self.inner.lock().fault = Some(fault);
    }
}

impl AuditLog for WalAuditLog {
    fn append(&self, entry: NewAuditRecord) -> Result<RecordId> {
        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(LifecycleError::AuditWrite(format!(
                "{}: log is poisoned after a failed rollback",
                self.path.display()
            )));
        }

        let rec = inner.state.prepare(entry);
        let frame = encode_frame(&rec)
            .map_err(|e| LifecycleError::AuditWrite(format!("encode record: {}", e)))?;

        if let Err(e) = write_frame(&mut inner, &frame) {
            if let Err(re) = rollback(&mut inner) {
                inner.poisoned = true;
                tracing::error!(
                    "Audit log {:?}: rollback to {} bytes failed, refusing further writes: {}",
                    self.path,
                    inner.committed_len,
                    re
                );
            }
            return Err(LifecycleError::AuditWrite(format!(
                "{}: {}",
                self.path.display(),
                e
            )));
        }

        inner.committed_len += frame.len() as u64;
        Ok(inner.state.commit(rec))
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        Ok(self.inner.lock().state.query(filter))
    }
}

fn encode_frame(rec: &AuditRecord) -> anyhow::Result<Vec<u8>> {
    let payload = serde_json::to_vec(rec)?;
    let len: u32 = payload.len().try_into()?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_frame(inner: &mut Inner, frame: &[u8]) -> std::io::Result<()> {
    #[cfg(test)]
    if let Some(fault) = inner.fault {
        match fault {
            WriteFault::ShortWrite | WriteFault::ShortWriteNoRollback => {
                inner.file.write_all(&frame[..frame.len() / 2])?;
                inner.fault = if fault == WriteFault::ShortWrite { None } else { Some(fault) };
                return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "short write"));
            }
            WriteFault::SyncFailed => {
                inner.fault = None;
                inner.file.write_all(frame)?;
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "sync failed"));
            }
        }
    }

    inner.file.write_all(frame)?;
    inner.file.flush()?;
    inner.file.sync_data()?;
    Ok(())
}

/// 截回最后一个已确认 frame 的末尾（文件以 append 模式打开，之后的写入自然接在这里）
fn rollback(inner: &mut Inner) -> std::io::Result<()> {
    #[cfg(test)]
    if inner.fault == Some(WriteFault::ShortWriteNoRollback) {
        inner.fault = None;
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "truncate failed"));
    }

    inner.file.set_len(inner.committed_len)?;
    inner.file.sync_data()
}

fn open_for_append(path: &Path, valid_len: u64) -> anyhow::Result<File> {
    let mut f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    if valid_len < HEADER_LEN {
        // 新文件/空文件：写 header
        f.set_len(0)?;
        f.write_all(&AUDIT_MAGIC.to_le_bytes())?;
        f.write_all(&AUDIT_VERSION.to_le_bytes())?;
        f.sync_data()?;
    } else if f.metadata()?.len() > valid_len {
        f.set_len(valid_len)?;
        f.sync_data()?;
    }
    drop(f);

    Ok(OpenOptions::new().append(true).open(path)?)
}

/// 回放整个审计文件。header 不匹配视为致命错误：审计历史不能被静默丢弃。
pub fn read_audit_file(path: &Path) -> anyhow::Result<AuditReplay> {
    if !path.exists() {
        return Ok(AuditReplay::default());
    }
    let mut f = File::open(path)?;

    let mut hdr = [0u8; 8];
    if f.read_exact(&mut hdr).is_err() {
        return Ok(AuditReplay::default());
    }
    let magic = u32::from_le_bytes(hdr[0..4].try_into()?);
    let ver = u32::from_le_bytes(hdr[4..8].try_into()?);
    if magic != AUDIT_MAGIC || ver != AUDIT_VERSION {
        anyhow::bail!(
            "audit log {:?} has unknown header {:#x}/{} (expected {:#x}/{})",
            path,
            magic,
            ver,
            AUDIT_MAGIC,
            AUDIT_VERSION
        );
    }

    let mut out = AuditReplay {
        valid_len: HEADER_LEN,
        ..AuditReplay::default()
    };
    loop {
        let mut lb = [0u8; 8];
        match f.read_exact(&mut lb) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // 可能是半个 frame header，也可能正好读完
                if f.metadata()?.len() > out.valid_len {
                    out.truncated_tail_records += 1;
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(lb[0..4].try_into()?) as usize;
        let crc = u32::from_le_bytes(lb[4..8].try_into()?);
        let mut buf = vec![0u8; len];
        if f.read_exact(&mut buf).is_err() || checksum(&buf) != crc {
            out.truncated_tail_records += 1;
            break;
        }
        match serde_json::from_slice::<AuditRecord>(&buf) {
            Ok(rec) => out.records.push(rec),
            Err(e) => {
                tracing::warn!("Audit record decode failed, stopping replay: {}", e);
                out.truncated_tail_records += 1;
                break;
            }
        }
        out.valid_len += FRAME_HEADER_LEN + len as u64;
    }
    Ok(out)
}
