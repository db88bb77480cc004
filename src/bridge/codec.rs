//! 消息编解码器
//!
//! 将脚本上下文中的动态类型值与跨边界传输用的 JSON 文本互相转换。
//! 字符串转义覆盖 `"`、`\` 以及所有 0x20 以下的控制字符。

use std::collections::BTreeMap;

/// 脚本值类型
///
/// 覆盖脚本上下文的完整类型空间：null/undefined、布尔、整数、
/// 浮点、字符串、有序列表和字符串键映射。
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// 整数可无损加宽为浮点
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScriptValue::Float(f) => Some(*f),
            ScriptValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ScriptValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScriptValue::Null,
            serde_json::Value::Bool(b) => ScriptValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ScriptValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    ScriptValue::Float(f)
                } else {
                    ScriptValue::Null
                }
            }
            serde_json::Value::String(s) => ScriptValue::String(s),
            serde_json::Value::Array(items) => {
                ScriptValue::Array(items.into_iter().map(ScriptValue::from).collect())
            }
            serde_json::Value::Object(map) => ScriptValue::Object(
                map.into_iter().map(|(k, v)| (k, ScriptValue::from(v))).collect(),
            ),
        }
    }
}

/// 将脚本值编码为规范的 JSON 文本
///
/// 数字编码与区域设置无关（`.` 作为小数分隔符）。非有限浮点数
/// （NaN/Infinity）编码为 `null`，JSON 无法表示它们。
pub fn encode(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Null => "null".to_string(),
        ScriptValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        ScriptValue::Int(i) => i.to_string(),
        ScriptValue::Float(f) => encode_float(*f),
        ScriptValue::String(s) => format!("\"{}\"", escape_json(s)),
        ScriptValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(encode).collect();
            format!("[{}]", parts.join(","))
        }
        ScriptValue::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json(k), encode(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// 整值浮点补上 `.0`，否则解码会把它折叠成整数
fn encode_float(f: f64) -> String {
    if !f.is_finite() {
        return "null".to_string();
    }
    let mut text = f.to_string();
    if !text.contains('.') && !text.contains('e') && !text.contains('E') {
        text.push_str(".0");
    }
    text
}

/// 从 JSON 文本解码脚本值
///
/// 畸形输入退化为 `Null` 而不是报错；顶层按键提取参数的缺失报告
/// 由信封层（`InvokeRequest::param_*`）负责。
pub fn decode(text: &str) -> ScriptValue {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => ScriptValue::from(value),
        Err(_) => ScriptValue::Null,
    }
}

/// 字符串转义
///
/// `"`、`\` 和退格/换页/换行/回车/制表使用标准双字符转义，
/// 其余 0x20 以下的控制字符使用 `\u00XX`。
pub fn escape_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// 反转义
///
/// 精确还原 `escape_json` 产生的转义形式（双字符转义和 `\uXXXX`）。
/// 未知转义序列原样透传，退化为字面字符而不是报错。
pub fn unescape_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                '"' => {
                    out.push('"');
                    i += 2;
                }
                '\\' => {
                    out.push('\\');
                    i += 2;
                }
                'b' => {
                    out.push('\u{08}');
                    i += 2;
                }
                'f' => {
                    out.push('\u{0C}');
                    i += 2;
                }
                'n' => {
                    out.push('\n');
                    i += 2;
                }
                'r' => {
                    out.push('\r');
                    i += 2;
                }
                't' => {
                    out.push('\t');
                    i += 2;
                }
                'u' => {
                    if let Some(c) = parse_unicode_escape(&chars, i + 2) {
                        out.push(c);
                        i += 6;
                    } else {
                        out.push('\\');
                        i += 1;
                    }
                }
                _ => {
                    out.push('\\');
                    i += 1;
                }
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn parse_unicode_escape(chars: &[char], start: usize) -> Option<char> {
    if start + 4 > chars.len() {
        return None;
    }
    let mut code = 0u32;
    for c in &chars[start..start + 4] {
        code = code * 16 + c.to_digit(16)?;
    }
    char::from_u32(code)
}
