use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// 日志文件保留天数
const LOG_RETENTION_DAYS: i64 = 7;

/// 内部状态，由 Mutex 保护
struct LogFileState {
    writer: Option<BufWriter<File>>,
    current_date: Option<NaiveDate>,
}

/// 线程安全的日志文件写入器
///
/// 按日期创建 `<log_dir>/YYYY-MM-DD.log`，每行一条由 tracing JSON
/// layer 格式化好的记录。实现 `MakeWriter`，可直接交给 `fmt::layer()`。
pub struct FileLogger {
    log_dir: PathBuf,
    state: Mutex<LogFileState>,
}

impl FileLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        // 确保日志目录存在
        let _ = fs::create_dir_all(&log_dir);
        Self {
            log_dir,
            state: Mutex::new(LogFileState {
                writer: None,
                current_date: None,
            }),
        }
    }

    /// 清理超过保留天数的日志文件
    pub fn cleanup_old_logs(&self) {
        let cutoff = Local::now().date_naive() - chrono::Duration::days(LOG_RETENTION_DAYS);
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            // 从文件名解析日期：YYYY-MM-DD.log
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    if date < cutoff {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
    }

    fn append(&self, buf: &[u8]) -> io::Result<()> {
        let today = Local::now().date_naive();
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return Ok(()),
        };

        // 日期切换时重新打开文件
        if state.current_date != Some(today) {
            state.writer = None;
            state.current_date = None;
            if let Some(w) = self.open_log_file(today) {
                state.writer = Some(w);
                state.current_date = Some(today);
            }
        }

        if let Some(ref mut writer) = state.writer {
            writer.write_all(buf)?;
            writer.flush()?;
        }
        Ok(())
    }

    fn open_log_file(&self, date: NaiveDate) -> Option<BufWriter<File>> {
        let filename = format!("{}.log", date.format("%Y-%m-%d"));
        let path = self.log_dir.join(filename);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
            .map(BufWriter::new)
    }
}

/// 单次事件的写入句柄
pub struct FileLogWriter<'a> {
    logger: &'a FileLogger,
}

impl Write for FileLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.logger.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for FileLogger {
    type Writer = FileLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileLogWriter { logger: self }
    }
}
