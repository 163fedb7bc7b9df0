//! File-backed handlers: `arqtxt` (line-oriented text file), `arqmem`
//! (in-memory byte buffer), `arqdir` (directory iteration), `arqlog`
//! (append-only log).
//!
//! File operations are short synchronous calls; failures return 0/empty
//! sentinels, never errors.

use std::{
    cell::RefCell,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write as _},
    path::Path,
    rc::Rc,
    time::SystemTime,
};

use chrono::{DateTime, Local};

use crate::{heap::ObjId, intern::StringId, value::Value};

// =========================================================================
// ArqTxt
// =========================================================================

#[derive(Debug)]
enum TxtFile {
    Read { reader: BufReader<File>, eof: bool },
    Write(BufWriter<File>),
}

#[derive(Debug)]
pub struct ArqTxt {
    pub owner: ObjId,
    pub field: StringId,
    file: Option<TxtFile>,
    /// Bytes consumed or produced so far.
    pos: u64,
}

impl ArqTxt {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            file: None,
            pos: 0,
        }
    }

    fn open(&mut self, path: &str, mode: &str) -> bool {
        self.close();
        self.pos = 0;
        let opened = match mode {
            "escrever" => File::create(path).map(|f| TxtFile::Write(BufWriter::new(f))),
            "adicionar" => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(|f| TxtFile::Write(BufWriter::new(f))),
            _ => File::open(path).map(|f| TxtFile::Read {
                reader: BufReader::new(f),
                eof: false,
            }),
        };
        match opened {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(_) => false,
        }
    }

    fn read_line(&mut self) -> String {
        let Some(TxtFile::Read { reader, eof }) = &mut self.file else {
            return String::new();
        };
        if *eof {
            return String::new();
        }
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => {
                *eof = true;
                String::new()
            }
            Ok(n) => {
                self.pos += n as u64;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                line
            }
        }
    }

    fn write_raw(&mut self, text: &str) -> bool {
        let Some(TxtFile::Write(writer)) = &mut self.file else {
            return false;
        };
        if writer.write_all(text.as_bytes()).is_ok() {
            self.pos += text.len() as u64;
            true
        } else {
            false
        }
    }

    pub fn close(&mut self) {
        if let Some(TxtFile::Write(mut writer)) = self.file.take() {
            let _ = writer.flush();
        }
        self.file = None;
    }
}

pub(super) fn txt_op(state: &Rc<RefCell<ArqTxt>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let text_arg = |n: usize| args.get(n).map(Value::to_text).unwrap_or_default();
    let out = match name {
        "abrir" => {
            let path = text_arg(0);
            let mode = text_arg(1).to_ascii_lowercase();
            Value::Int(i64::from(s.open(&path, &mode)))
        }
        "ler" => Value::from(s.read_line()),
        "escrevaln" => {
            let mut text = text_arg(0).to_string();
            text.push('\n');
            Value::Int(i64::from(s.write_raw(&text)))
        }
        "escreva" => Value::Int(i64::from(s.write_raw(&text_arg(0)))),
        "despejar" => {
            if let Some(TxtFile::Write(writer)) = &mut s.file {
                let _ = writer.flush();
            }
            Value::Int(1)
        }
        "fim" => {
            let eof = match &s.file {
                Some(TxtFile::Read { eof, .. }) => *eof,
                _ => true,
            };
            Value::Int(i64::from(eof))
        }
        "pos" => Value::Int(i64::try_from(s.pos).unwrap_or(i64::MAX)),
        "fechar" => {
            s.close();
            Value::Int(1)
        }
        "existe" => {
            let path = text_arg(0);
            Value::Int(i64::from(Path::new(&*path).is_file()))
        }
        _ => return None,
    };
    Some(out)
}

// =========================================================================
// ArqMem
// =========================================================================

#[derive(Debug)]
pub struct ArqMem {
    pub owner: ObjId,
    pub field: StringId,
    pub data: Vec<u8>,
    pub pos: usize,
}

impl ArqMem {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            data: Vec::new(),
            pos: 0,
        }
    }
}

pub(super) fn mem_op(state: &Rc<RefCell<ArqMem>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "tamanho" => Value::Int(s.data.len() as i64),
        "pos" => {
            if let Some(v) = args.first() {
                let len = s.data.len();
                s.pos = usize::try_from(v.to_i64().max(0)).unwrap_or(0).min(len);
            }
            Value::Int(s.pos as i64)
        }
        "fim" => Value::Int(i64::from(s.pos >= s.data.len())),
        "ler" => {
            let n = usize::try_from(args.first().map_or(0, Value::to_i64).max(0)).unwrap_or(0);
            let end = (s.pos + n).min(s.data.len());
            let chunk = String::from_utf8_lossy(&s.data[s.pos..end]).into_owned();
            s.pos = end;
            Value::from(chunk)
        }
        "escreva" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            let bytes = text.as_bytes();
            let end = s.pos + bytes.len();
            if end > s.data.len() {
                s.data.resize(end, 0);
            }
            let at = s.pos;
            s.data[at..end].copy_from_slice(bytes);
            s.pos = end;
            Value::Int(bytes.len() as i64)
        }
        "lerbyte" => {
            if s.pos < s.data.len() {
                let b = s.data[s.pos];
                s.pos += 1;
                Value::Int(i64::from(b))
            } else {
                Value::Int(-1)
            }
        }
        "escrevabyte" => {
            let b = (args.first().map_or(0, Value::to_i64) & 0xFF) as u8;
            if s.pos < s.data.len() {
                let at = s.pos;
                s.data[at] = b;
            } else {
                s.data.push(b);
            }
            s.pos += 1;
            Value::Int(1)
        }
        "juntar" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            s.data.extend_from_slice(text.as_bytes());
            Value::Int(s.data.len() as i64)
        }
        "limpar" => {
            s.data.clear();
            s.pos = 0;
            Value::Int(1)
        }
        "truncar" => {
            let n = usize::try_from(args.first().map_or(0, Value::to_i64).max(0)).unwrap_or(0);
            s.data.truncate(n);
            s.pos = s.pos.min(s.data.len());
            Value::Int(s.data.len() as i64)
        }
        _ => return None,
    };
    Some(out)
}

// =========================================================================
// ArqDir
// =========================================================================

#[derive(Debug, Clone)]
struct DirEntryInfo {
    name: String,
    is_dir: bool,
    size: u64,
    mtime: Option<SystemTime>,
    atime: Option<SystemTime>,
}

#[derive(Debug)]
pub struct ArqDir {
    pub owner: ObjId,
    pub field: StringId,
    entries: Vec<DirEntryInfo>,
    pos: usize,
    open: bool,
}

impl ArqDir {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            entries: Vec::new(),
            pos: 0,
            open: false,
        }
    }

    fn open_dir(&mut self, path: &str) -> bool {
        self.close();
        let Ok(read) = fs::read_dir(path) else {
            return false;
        };
        for entry in read.flatten() {
            let meta = entry.metadata().ok();
            self.entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.as_ref().is_some_and(std::fs::Metadata::is_dir),
                size: meta.as_ref().map_or(0, std::fs::Metadata::len),
                mtime: meta.as_ref().and_then(|m| m.modified().ok()),
                atime: meta.as_ref().and_then(|m| m.accessed().ok()),
            });
        }
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.open = true;
        true
    }

    pub fn close(&mut self) {
        self.entries.clear();
        self.pos = 0;
        self.open = false;
    }

    fn current(&self) -> Option<&DirEntryInfo> {
        if self.open { self.entries.get(self.pos) } else { None }
    }
}

fn format_time(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => {
            let local: DateTime<Local> = t.into();
            local.format("%Y%m%d%H%M%S").to_string()
        }
        None => String::new(),
    }
}

pub(super) fn dir_op(state: &Rc<RefCell<ArqDir>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let text_arg = |n: usize| args.get(n).map(Value::to_text).unwrap_or_default();
    let out = match name {
        "abrir" => Value::Int(i64::from(s.open_dir(&text_arg(0)))),
        "fechar" => {
            s.close();
            Value::Int(1)
        }
        "temarq" => Value::Int(i64::from(s.current().is_some())),
        "nome" => s
            .current()
            .map_or_else(|| Value::from(""), |e| Value::from(e.name.as_str())),
        "depois" => {
            s.pos += 1;
            Value::Int(i64::from(s.current().is_some()))
        }
        "tipo" => s
            .current()
            .map_or_else(|| Value::from(""), |e| Value::from(if e.is_dir { "D" } else { "A" })),
        "tamanho" => Value::Int(s.current().map_or(0, |e| i64::try_from(e.size).unwrap_or(i64::MAX))),
        "datamod" => Value::from(format_time(s.current().and_then(|e| e.mtime))),
        "dataacesso" => Value::from(format_time(s.current().and_then(|e| e.atime))),
        // path helpers, usable without an open directory
        "barra" => Value::from(text_arg(0).replace('\\', "/")),
        "apagararq" => Value::Int(i64::from(fs::remove_file(&*text_arg(0)).is_ok())),
        "apagardir" => Value::Int(i64::from(fs::remove_dir(&*text_arg(0)).is_ok())),
        "criardir" => Value::Int(i64::from(fs::create_dir_all(&*text_arg(0)).is_ok())),
        "renomear" => {
            Value::Int(i64::from(fs::rename(&*text_arg(0), &*text_arg(1)).is_ok()))
        }
        _ => return None,
    };
    Some(out)
}

// =========================================================================
// ArqLog
// =========================================================================

#[derive(Debug)]
pub struct ArqLog {
    pub owner: ObjId,
    pub field: StringId,
    file: Option<BufWriter<File>>,
}

impl ArqLog {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        Self {
            owner,
            field,
            file: None,
        }
    }

    pub fn close(&mut self) {
        if let Some(mut writer) = self.file.take() {
            let _ = writer.flush();
        }
    }
}

pub(super) fn log_op(state: &Rc<RefCell<ArqLog>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let text_arg = |n: usize| args.get(n).map(Value::to_text).unwrap_or_default();
    let out = match name {
        "existe" => Value::Int(i64::from(Path::new(&*text_arg(0)).is_file())),
        "abrir" => {
            s.close();
            let path = text_arg(0);
            if let Some(parent) = Path::new(&*path).parent() {
                let _ = fs::create_dir_all(parent);
            }
            let opened = OpenOptions::new().create(true).append(true).open(&*path);
            match opened {
                Ok(f) => {
                    s.file = Some(BufWriter::new(f));
                    Value::Int(1)
                }
                Err(_) => Value::Int(0),
            }
        }
        "escrevaln" => match &mut s.file {
            Some(writer) => {
                let mut text = text_arg(0).to_string();
                text.push('\n');
                let ok = writer.write_all(text.as_bytes()).is_ok() && writer.flush().is_ok();
                Value::Int(i64::from(ok))
            }
            None => Value::Int(0),
        },
        "fechar" => {
            s.close();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler_txt() -> Rc<RefCell<ArqTxt>> {
        Rc::new(RefCell::new(ArqTxt::new(ObjId::NONE, StringId::from_index(0))))
    }

    #[test]
    fn write_then_read_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saida.txt");
        let path = path.to_string_lossy().into_owned();

        let h = handler_txt();
        assert_eq!(
            txt_op(&h, "abrir", &[Value::from(path.as_str()), Value::from("escrever")])
                .unwrap()
                .to_i64(),
            1
        );
        txt_op(&h, "escrevaln", &[Value::from("primeira")]);
        txt_op(&h, "escrevaln", &[Value::from("segunda")]);
        txt_op(&h, "fechar", &[]);

        assert_eq!(
            txt_op(&h, "abrir", &[Value::from(path.as_str()), Value::from("ler")])
                .unwrap()
                .to_i64(),
            1
        );
        assert_eq!(&*txt_op(&h, "ler", &[]).unwrap().to_text(), "primeira");
        assert_eq!(&*txt_op(&h, "ler", &[]).unwrap().to_text(), "segunda");
        assert_eq!(txt_op(&h, "fim", &[]).unwrap().to_i64(), 0);
        assert_eq!(&*txt_op(&h, "ler", &[]).unwrap().to_text(), "");
        assert_eq!(txt_op(&h, "fim", &[]).unwrap().to_i64(), 1);
    }

    #[test]
    fn open_missing_file_is_a_sentinel() {
        let h = handler_txt();
        assert_eq!(
            txt_op(&h, "abrir", &[Value::from("/nao/existe"), Value::from("ler")])
                .unwrap()
                .to_i64(),
            0
        );
    }

    #[test]
    fn mem_buffer_read_write() {
        let h = Rc::new(RefCell::new(ArqMem::new(ObjId::NONE, StringId::from_index(0))));
        mem_op(&h, "escreva", &[Value::from("abc")]);
        assert_eq!(mem_op(&h, "tamanho", &[]).unwrap().to_i64(), 3);
        mem_op(&h, "pos", &[Value::Int(0)]);
        assert_eq!(&*mem_op(&h, "ler", &[Value::Int(2)]).unwrap().to_text(), "ab");
        assert_eq!(mem_op(&h, "lerbyte", &[]).unwrap().to_i64(), i64::from(b'c'));
        assert_eq!(mem_op(&h, "fim", &[]).unwrap().to_i64(), 1);
        mem_op(&h, "truncar", &[Value::Int(1)]);
        assert_eq!(mem_op(&h, "tamanho", &[]).unwrap().to_i64(), 1);
    }

    #[test]
    fn dir_iteration_and_helpers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let h = Rc::new(RefCell::new(ArqDir::new(ObjId::NONE, StringId::from_index(0))));
        let path = dir.path().to_string_lossy().into_owned();
        assert_eq!(dir_op(&h, "abrir", &[Value::from(path.as_str())]).unwrap().to_i64(), 1);
        assert_eq!(dir_op(&h, "temarq", &[]).unwrap().to_i64(), 1);
        assert_eq!(&*dir_op(&h, "nome", &[]).unwrap().to_text(), "a.txt");
        assert_eq!(&*dir_op(&h, "tipo", &[]).unwrap().to_text(), "A");
        dir_op(&h, "depois", &[]);
        dir_op(&h, "depois", &[]);
        assert_eq!(&*dir_op(&h, "nome", &[]).unwrap().to_text(), "sub");
        assert_eq!(&*dir_op(&h, "tipo", &[]).unwrap().to_text(), "D");
        dir_op(&h, "depois", &[]);
        assert_eq!(dir_op(&h, "temarq", &[]).unwrap().to_i64(), 0);

        assert_eq!(
            &*dir_op(&h, "barra", &[Value::from("a\\b\\c")]).unwrap().to_text(),
            "a/b/c"
        );
    }

    #[test]
    fn log_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/ano/app.log");
        let path = path.to_string_lossy().into_owned();
        let h = Rc::new(RefCell::new(ArqLog::new(ObjId::NONE, StringId::from_index(0))));
        assert_eq!(log_op(&h, "abrir", &[Value::from(path.as_str())]).unwrap().to_i64(), 1);
        log_op(&h, "escrevaln", &[Value::from("evento")]);
        log_op(&h, "fechar", &[]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "evento\n");
    }
}
