use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::pty::PtySession;

/// 每个终端最多缓存的输出块数，超出后丢弃最旧的
pub const OUTPUT_BUFFER_CHUNKS: usize = 5000;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Terminal '{0}' not found")]
    NotFound(String),
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),
    #[error("Terminal I/O error: {0}")]
    Io(String),
}

/// 有界输出缓冲区：按块计数，超出容量时淘汰最旧的块
pub struct OutputBuffer {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.chunks.push_back(data);
        while self.chunks.len() > self.capacity {
            self.chunks.pop_front();
        }
    }

    /// 取走全部已缓存输出
    pub fn drain(&mut self) -> String {
        let mut bytes = Vec::new();
        for chunk in self.chunks.drain(..) {
            bytes.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 读取线程发往写入 task 的事件
#[derive(Debug)]
pub enum TerminalEvent {
    Output { term_id: String, data: Vec<u8> },
    Exited { term_id: String, error: Option<String> },
}

/// 单个会话的输入端，写入时只锁这一个会话
pub type SessionInput = Arc<std::sync::Mutex<Box<dyn Write + Send>>>;

/// 单个终端条目
pub struct TerminalEntry {
    pub session: PtySession,
    pub input: SessionInput,
    pub output: OutputBuffer,
}

/// 终端注册表，生命周期 = 服务进程生命周期
pub struct TerminalRegistry {
    terminals: HashMap<String, TerminalEntry>,
    next_id: u64,
    shell: String,
    fallback_cwd: PathBuf,
}

pub type SharedTerminalRegistry = Arc<Mutex<TerminalRegistry>>;

impl TerminalRegistry {
    pub fn new(shell: String, fallback_cwd: PathBuf) -> Self {
        Self {
            terminals: HashMap::new(),
            // 以当前毫秒时间为起点，单调递增
            next_id: chrono::Utc::now().timestamp_millis().max(0) as u64,
            shell,
            fallback_cwd,
        }
    }

    /// 创建新的 PTY 终端并启动读取线程，返回 term_id
    pub fn spawn(
        &mut self,
        cwd: Option<&Path>,
        events_tx: mpsc::Sender<TerminalEvent>,
    ) -> Result<String, TerminalError> {
        let cwd_path = match cwd {
            Some(dir) if dir.is_dir() => dir.to_path_buf(),
            _ => {
                std::fs::create_dir_all(&self.fallback_cwd)
                    .map_err(|e| TerminalError::Spawn(e.to_string()))?;
                self.fallback_cwd.clone()
            }
        };

        let term_id = self.next_id.to_string();
        self.next_id += 1;

        let mut session = PtySession::spawn(&term_id, &self.shell, &cwd_path)
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        let reader = session
            .take_reader()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        let writer = session
            .take_writer()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        spawn_reader_thread(term_id.clone(), reader, events_tx);
        info!(term_id = %term_id, cwd = ?cwd_path, "Terminal session started");

        self.terminals.insert(
            term_id.clone(),
            TerminalEntry {
                session,
                input: Arc::new(std::sync::Mutex::new(writer)),
                output: OutputBuffer::new(OUTPUT_BUFFER_CHUNKS),
            },
        );

        Ok(term_id)
    }

    /// 会话输入端；实际写入在注册表锁之外进行
    pub fn input(&self, term_id: &str) -> Result<SessionInput, TerminalError> {
        self.terminals
            .get(term_id)
            .map(|e| e.input.clone())
            .ok_or_else(|| TerminalError::NotFound(term_id.to_string()))
    }

    /// 取走自上次读取以来的全部输出
    pub fn drain_output(&mut self, term_id: &str) -> Result<String, TerminalError> {
        self.terminals
            .get_mut(term_id)
            .map(|e| e.output.drain())
            .ok_or_else(|| TerminalError::NotFound(term_id.to_string()))
    }

    pub fn term_ids(&self) -> Vec<String> {
        self.terminals.keys().cloned().collect()
    }

    /// 关闭所有终端（仅在服务退出时调用）
    pub fn close_all(&mut self) {
        for (_, mut entry) in self.terminals.drain() {
            entry.session.kill();
        }
    }

    fn apply(&mut self, event: TerminalEvent) {
        match event {
            TerminalEvent::Output { term_id, data } => {
                if let Some(entry) = self.terminals.get_mut(&term_id) {
                    entry.output.push(data);
                }
            }
            TerminalEvent::Exited { term_id, error } => {
                // 会话立即移除，未读输出随之丢弃；错误只进日志
                if let Some(entry) = self.terminals.remove(&term_id) {
                    match error {
                        Some(message) => warn!(
                            term_id = %term_id,
                            unread_chunks = entry.output.len(),
                            "Terminal session failed: {}",
                            message
                        ),
                        None => info!(
                            term_id = %term_id,
                            unread_chunks = entry.output.len(),
                            "Terminal session closed"
                        ),
                    }
                }
            }
        }
    }
}

/// 终端会话管理器：注册表 + 输出写入 task
#[derive(Clone)]
pub struct TerminalManager {
    registry: SharedTerminalRegistry,
    events_tx: mpsc::Sender<TerminalEvent>,
}

impl TerminalManager {
    /// 必须在 tokio runtime 内调用
    pub fn start(shell: String, fallback_cwd: PathBuf) -> Self {
        let registry: SharedTerminalRegistry =
            Arc::new(Mutex::new(TerminalRegistry::new(shell, fallback_cwd)));
        let events_tx = spawn_output_writer(registry.clone());
        Self {
            registry,
            events_tx,
        }
    }

    pub async fn create(&self, cwd: Option<&Path>) -> Result<String, TerminalError> {
        let mut reg = self.registry.lock().await;
        reg.spawn(cwd, self.events_tx.clone())
    }

    /// PTY 写入可能阻塞（子进程不读输入时），放到 blocking 线程上，且不持有注册表锁
    pub async fn write(&self, term_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        let input = self.registry.lock().await.input(term_id)?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_input(&input, &data))
            .await
            .map_err(|e| TerminalError::Io(e.to_string()))?
    }

    pub async fn read(&self, term_id: &str) -> Result<String, TerminalError> {
        let mut reg = self.registry.lock().await;
        reg.drain_output(term_id)
    }

    pub async fn close_all(&self) {
        self.registry.lock().await.close_all();
    }
}

fn write_input(input: &SessionInput, data: &[u8]) -> Result<(), TerminalError> {
    let mut writer = input
        .lock()
        .map_err(|_| TerminalError::Io("PTY writer lock poisoned".to_string()))?;
    writer
        .write_all(data)
        .and_then(|_| writer.flush())
        .map_err(|e| TerminalError::Io(e.to_string()))?;
    debug!(bytes = data.len(), "Wrote input to PTY");
    Ok(())
}

/// 启动输出写入 task（异步处理，避免 std::thread 中 await Mutex）
pub fn spawn_output_writer(registry: SharedTerminalRegistry) -> mpsc::Sender<TerminalEvent> {
    let (tx, mut rx) = mpsc::channel::<TerminalEvent>(512);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            registry.lock().await.apply(event);
        }
        info!("Terminal output writer task exited");
    });

    tx
}

/// PTY 读取线程：按完整转义序列 / UTF-8 字符切块后转发
fn spawn_reader_thread(
    term_id: String,
    reader: Box<dyn std::io::Read + Send>,
    events_tx: mpsc::Sender<TerminalEvent>,
) {
    std::thread::spawn(move || {
        use std::io::Read;
        let mut reader = reader;
        let mut buf = [0u8; 8192];
        let mut pending: Vec<u8> = Vec::new();
        let error = loop {
            match reader.read(&mut buf) {
                Ok(0) => break None,
                Ok(n) => {
                    let mut data = if pending.is_empty() {
                        buf[..n].to_vec()
                    } else {
                        let mut combined = std::mem::take(&mut pending);
                        combined.extend_from_slice(&buf[..n]);
                        combined
                    };

                    if let Some(incomplete_start) = find_incomplete_escape_sequence(&data) {
                        pending = data.split_off(incomplete_start);
                    }

                    if !data.is_empty()
                        && events_tx
                            .blocking_send(TerminalEvent::Output {
                                term_id: term_id.clone(),
                                data,
                            })
                            .is_err()
                    {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if is_pty_hangup(&e) => break None,
                Err(e) => {
                    warn!(term_id = %term_id, "PTY read error: {}", e);
                    break Some(e.to_string());
                }
            }
        };

        if !pending.is_empty() {
            let _ = events_tx.blocking_send(TerminalEvent::Output {
                term_id: term_id.clone(),
                data: pending,
            });
        }
        debug!(term_id = %term_id, "PTY reader finished");
        let _ = events_tx.blocking_send(TerminalEvent::Exited { term_id, error });
    });
}

/// Linux 上子进程退出后读 master 返回 EIO，等同于 EOF
#[cfg(unix)]
fn is_pty_hangup(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_pty_hangup(_e: &std::io::Error) -> bool {
    false
}

/// 查找数据末尾不完整的 ANSI 转义序列的起始位置
/// 返回 Some(index) 表示从 index 开始是不完整的序列，需要保留到下次发送
/// 返回 None 表示数据完整，可以直接发送
///
/// ANSI 转义序列格式：
/// - CSI (Control Sequence Introducer): ESC [ ... 终止符 (字母)
/// - OSC (Operating System Command): ESC ] ... BEL 或 ESC \\
/// - DCS (Device Control String): ESC P ... ESC \\
/// - 简单序列: ESC 后跟单个字符
fn find_incomplete_escape_sequence(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }

    let search_start = data.len().saturating_sub(256);

    for i in (search_start..data.len()).rev() {
        if data[i] != 0x1b {
            continue;
        }
        let remaining = &data[i..];
        if remaining.len() < 2 {
            return Some(i);
        }

        let complete = match remaining[1] {
            b'[' => remaining
                .iter()
                .skip(2)
                .any(|&c| (0x40..=0x7E).contains(&c)),
            b']' => has_string_terminator(&remaining[2..], true),
            b'P' => has_string_terminator(&remaining[2..], false),
            _ => true,
        };
        if !complete {
            return Some(i);
        }
    }

    // 检查 UTF-8 多字节字符是否被截断
    let len = data.len();
    let last = data[len - 1];
    if last >= 0xC0 {
        return Some(len - 1);
    }
    if len >= 2 && data[len - 2] >= 0xE0 && (0x80..0xC0).contains(&last) {
        return Some(len - 2);
    }
    if len >= 3 && data[len - 3] >= 0xF0 && data[len - 2] >= 0x80 && last >= 0x80 {
        return Some(len - 3);
    }

    None
}

/// ST (ESC \\) 或在允许时 BEL
fn has_string_terminator(body: &[u8], allow_bel: bool) -> bool {
    body.iter().enumerate().any(|(j, &c)| {
        (allow_bel && c == 0x07) || (c == 0x1b && body.get(j + 1) == Some(&b'\\'))
    })
}
