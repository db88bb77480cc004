//! 文件系统能力模块
//!
//! 以点号方法名（`fs.*`）向脚本上下文暴露文件与目录操作。每个处理器
//! 自行完成领域校验：缺参报 400，路径不安全报 403，资源缺失报 404，
//! 意外 I/O 故障经 `?` 汇入分发器的 500 通道。
//!
//! 二进制内容经标准 base64 往返（`encoding: "base64"`）。

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::bridge::dispatcher::InvokeDispatcher;
use crate::bridge::envelope::{ErrorCode, InvokeRequest, InvokeResponse, Param};
use crate::bridge::ScriptValue;
use crate::core::error::ShellResult;

/// 读取结果，作为成功应答的结构化负载
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadResult {
    success: bool,
    data: String,
    error: String,
    encoding: String,
}

/// 写入结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    success: bool,
    error: String,
    bytes_written: u64,
}

/// 文件元信息
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileInfo {
    name: String,
    path: String,
    extension: String,
    size: u64,
    modified: i64,
    created: i64,
    is_directory: bool,
    is_file: bool,
    is_symlink: bool,
}

/// 目录条目
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryEntry {
    name: String,
    path: String,
    is_directory: bool,
}

pub struct FileSystemModule;

impl FileSystemModule {
    /// 在分发器上注册全部 fs 处理器
    pub fn register_handlers(dispatcher: &mut InvokeDispatcher) {
        // 文件操作
        dispatcher.register_fn("fs.readFile", handle_read_file);
        dispatcher.register_fn("fs.writeFile", handle_write_file);
        dispatcher.register_fn("fs.appendFile", handle_append_file);
        dispatcher.register_fn("fs.deleteFile", handle_delete_file);
        dispatcher.register_fn("fs.copyFile", handle_copy_file);
        dispatcher.register_fn("fs.moveFile", handle_move_file);

        // 目录操作
        dispatcher.register_fn("fs.readDir", handle_read_dir);
        dispatcher.register_fn("fs.createDir", handle_create_dir);
        dispatcher.register_fn("fs.deleteDir", handle_delete_dir);

        // 信息查询
        dispatcher.register_fn("fs.getFileInfo", handle_get_file_info);
        dispatcher.register_fn("fs.exists", handle_exists);

        // 路径运算
        dispatcher.register_fn("fs.resolvePath", handle_resolve_path);
        dispatcher.register_fn("fs.basename", handle_basename);
        dispatcher.register_fn("fs.dirname", handle_dirname);
        dispatcher.register_fn("fs.extname", handle_extname);
        dispatcher.register_fn("fs.joinPath", handle_join_path);

        tracing::info!(target: "jsapi", "FileSystem handlers registered");
    }
}

// ==================== 参数辅助 ====================

fn require_str(
    request: &InvokeRequest,
    response: &mut InvokeResponse,
    key: &str,
) -> Option<String> {
    match request.param_str(key) {
        Param::Found(value) => Some(value),
        _ => {
            response.set_error(
                format!("Missing required parameter: {}", key),
                ErrorCode::Client,
            );
            None
        }
    }
}

fn str_param_or(request: &InvokeRequest, key: &str, default: &str) -> String {
    request.param_str(key).found_or(default.to_string())
}

fn bool_param_or(request: &InvokeRequest, key: &str, default: bool) -> bool {
    request.param_bool(key).found_or(default)
}

/// 拒绝带危险片段的路径
pub(crate) fn is_path_safe(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    !["..", "~", "$"].iter().any(|pattern| path.contains(pattern))
}

/// 路径不安全时写入 403 并返回 false
fn check_path_safe(path: &str, response: &mut InvokeResponse) -> bool {
    if is_path_safe(path) {
        true
    } else {
        response.set_error("Unsafe path", ErrorCode::Forbidden);
        false
    }
}

fn to_json<T: Serialize>(value: &T) -> ShellResult<String> {
    Ok(serde_json::to_string(value)?)
}

// ==================== 文件操作 ====================

fn handle_read_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let encoding = str_param_or(request, "encoding", "utf8");
    if !check_path_safe(&path, response) {
        return Ok(());
    }

    let fs_path = Path::new(&path);
    if !fs_path.exists() {
        response.set_error("File not found", ErrorCode::NotFound);
        return Ok(());
    }
    if !fs_path.is_file() {
        response.set_error("Path is not a file", ErrorCode::Client);
        return Ok(());
    }

    let read = if encoding == "binary" || encoding == "base64" {
        fs::read(fs_path).map(|bytes| {
            if encoding == "base64" {
                BASE64.encode(&bytes)
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        })
    } else {
        fs::read_to_string(fs_path)
    };

    let result = match read {
        Ok(data) => ReadResult {
            success: true,
            data,
            error: String::new(),
            encoding,
        },
        Err(e) => ReadResult {
            success: false,
            data: String::new(),
            error: format!("Failed to open file: {}", e),
            encoding,
        },
    };
    response.set_success(to_json(&result)?);
    Ok(())
}

fn handle_write_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let Some(data) = require_str(request, response, "data") else {
        return Ok(());
    };
    let encoding = str_param_or(request, "encoding", "utf8");
    let create_dirs = bool_param_or(request, "createDirs", false);
    if !check_path_safe(&path, response) {
        return Ok(());
    }

    let fs_path = Path::new(&path);
    if create_dirs {
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent)?;
        }
    }

    let bytes: Vec<u8> = if encoding == "base64" {
        match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => {
                response.set_error("Invalid base64 data", ErrorCode::Client);
                return Ok(());
            }
        }
    } else {
        data.into_bytes()
    };

    let result = match fs::write(fs_path, &bytes) {
        Ok(()) => WriteResult {
            success: true,
            error: String::new(),
            bytes_written: bytes.len() as u64,
        },
        Err(e) => WriteResult {
            success: false,
            error: format!("Failed to open file for writing: {}", e),
            bytes_written: 0,
        },
    };
    response.set_success(to_json(&result)?);
    Ok(())
}

fn handle_append_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let Some(data) = require_str(request, response, "data") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }

    let result = match fs::OpenOptions::new().append(true).create(true).open(&path) {
        Ok(mut file) => match file.write_all(data.as_bytes()) {
            Ok(()) => WriteResult {
                success: true,
                error: String::new(),
                bytes_written: data.len() as u64,
            },
            Err(e) => WriteResult {
                success: false,
                error: format!("Failed to append: {}", e),
                bytes_written: 0,
            },
        },
        Err(e) => WriteResult {
            success: false,
            error: format!("Failed to open file for writing: {}", e),
            bytes_written: 0,
        },
    };
    response.set_success(to_json(&result)?);
    Ok(())
}

fn handle_delete_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    let fs_path = Path::new(&path);
    if !fs_path.exists() {
        response.set_error("File not found", ErrorCode::NotFound);
        return Ok(());
    }
    if !fs_path.is_file() {
        response.set_error("Path is not a file", ErrorCode::Client);
        return Ok(());
    }
    fs::remove_file(fs_path)?;
    response.set_success(serde_json::json!({ "deleted": true }).to_string());
    Ok(())
}

fn handle_copy_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(from) = require_str(request, response, "from") else {
        return Ok(());
    };
    let Some(to) = require_str(request, response, "to") else {
        return Ok(());
    };
    if !check_path_safe(&from, response) || !check_path_safe(&to, response) {
        return Ok(());
    }
    if !Path::new(&from).exists() {
        response.set_error("File not found", ErrorCode::NotFound);
        return Ok(());
    }
    let bytes_copied = fs::copy(&from, &to)?;
    response.set_success(serde_json::json!({ "bytesCopied": bytes_copied }).to_string());
    Ok(())
}

fn handle_move_file(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(from) = require_str(request, response, "from") else {
        return Ok(());
    };
    let Some(to) = require_str(request, response, "to") else {
        return Ok(());
    };
    if !check_path_safe(&from, response) || !check_path_safe(&to, response) {
        return Ok(());
    }
    if !Path::new(&from).exists() {
        response.set_error("File not found", ErrorCode::NotFound);
        return Ok(());
    }
    fs::rename(&from, &to)?;
    response.set_success(serde_json::json!({ "moved": true }).to_string());
    Ok(())
}

// ==================== 目录操作 ====================

fn handle_read_dir(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let recursive = bool_param_or(request, "recursive", false);
    if !check_path_safe(&path, response) {
        return Ok(());
    }

    let fs_path = Path::new(&path);
    if !fs_path.exists() {
        response.set_error("Directory not found", ErrorCode::NotFound);
        return Ok(());
    }
    if !fs_path.is_dir() {
        response.set_error("Path is not a directory", ErrorCode::Client);
        return Ok(());
    }

    let mut entries = Vec::new();
    collect_entries(fs_path, recursive, &mut entries)?;
    response.set_success(to_json(&entries)?);
    Ok(())
}

fn collect_entries(
    dir: &Path,
    recursive: bool,
    out: &mut Vec<DirectoryEntry>,
) -> ShellResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let entry_path = entry.path();
        let is_directory = entry_path.is_dir();
        out.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry_path.to_string_lossy().into_owned(),
            is_directory,
        });
        if recursive && is_directory {
            collect_entries(&entry_path, true, out)?;
        }
    }
    Ok(())
}

fn handle_create_dir(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    fs::create_dir_all(&path)?;
    response.set_success(serde_json::json!({ "created": true }).to_string());
    Ok(())
}

fn handle_delete_dir(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let recursive = bool_param_or(request, "recursive", false);
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    let fs_path = Path::new(&path);
    if !fs_path.exists() {
        response.set_error("Directory not found", ErrorCode::NotFound);
        return Ok(());
    }
    if !fs_path.is_dir() {
        response.set_error("Path is not a directory", ErrorCode::Client);
        return Ok(());
    }
    if recursive {
        fs::remove_dir_all(fs_path)?;
    } else {
        fs::remove_dir(fs_path)?;
    }
    response.set_success(serde_json::json!({ "deleted": true }).to_string());
    Ok(())
}

// ==================== 信息查询 ====================

fn handle_get_file_info(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    let fs_path = Path::new(&path);
    if !fs_path.exists() {
        response.set_error("File not found", ErrorCode::NotFound);
        return Ok(());
    }

    let metadata = fs::metadata(fs_path)?;
    let symlink = fs::symlink_metadata(fs_path)?.file_type().is_symlink();
    let info = FileInfo {
        name: fs_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.clone(),
        extension: fs_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: metadata.len(),
        modified: unix_seconds(metadata.modified().ok()),
        created: unix_seconds(metadata.created().ok()),
        is_directory: metadata.is_dir(),
        is_file: metadata.is_file(),
        is_symlink: symlink,
    };
    response.set_success(to_json(&info)?);
    Ok(())
}

fn unix_seconds(time: Option<std::time::SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn handle_exists(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    let exists = Path::new(&path).exists();
    response.set_success(serde_json::json!({ "exists": exists }).to_string());
    Ok(())
}

// ==================== 路径运算（纯字符串，不触碰资源） ====================

fn handle_resolve_path(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    if !check_path_safe(&path, response) {
        return Ok(());
    }
    // 解析失败时原样返回
    let resolved = fs::canonicalize(&path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(path);
    response.set_success(serde_json::json!({ "path": resolved }).to_string());
    Ok(())
}

fn handle_basename(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let basename = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    response.set_success(serde_json::json!({ "basename": basename }).to_string());
    Ok(())
}

fn handle_dirname(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let dirname = Path::new(&path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    response.set_success(serde_json::json!({ "dirname": dirname }).to_string());
    Ok(())
}

fn handle_extname(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let Some(path) = require_str(request, response, "path") else {
        return Ok(());
    };
    let extname = Path::new(&path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    response.set_success(serde_json::json!({ "extname": extname }).to_string());
    Ok(())
}

fn handle_join_path(request: &InvokeRequest, response: &mut InvokeResponse) -> ShellResult<()> {
    let segments = match request.param("paths") {
        Param::Found(ScriptValue::Array(items)) => items,
        Param::Found(_) => {
            response.set_error("Parameter paths must be an array of strings", ErrorCode::Client);
            return Ok(());
        }
        _ => {
            response.set_error("Missing required parameter: paths", ErrorCode::Client);
            return Ok(());
        }
    };

    let mut joined = PathBuf::new();
    for segment in &segments {
        match segment.as_str() {
            Some(s) => joined.push(s),
            None => {
                response.set_error(
                    "Parameter paths must be an array of strings",
                    ErrorCode::Client,
                );
                return Ok(());
            }
        }
    }
    response
        .set_success(serde_json::json!({ "path": joined.to_string_lossy() }).to_string());
    Ok(())
}
