//! 帧解码：字节流 → 字段 → 十进制数字串。
//!
//! 每个字节渲染为两位十六进制 token。值以 BCD 形式位于标记之前，
//! 所以倒序扫描：遇到标记后继续向后收集连续的纯数字 token，直到遇到
//! 非数字 token 或序列结束。

use domain::Field;

/// 一帧解码结果，按发现顺序保存（倒序扫描的顺序）。
///
/// 同一标记出现多次时保留首次发现的位置，数值取最后一次发现的。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    entries: Vec<(Field, String)>,
}

impl DecodedFrame {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, digits)| digits.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.entries
            .iter()
            .map(|(field, digits)| (*field, digits.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn upsert(&mut self, field: Field, digits: String) {
        match self.entries.iter_mut().find(|(candidate, _)| *candidate == field) {
            Some(entry) => entry.1 = digits,
            None => self.entries.push((field, digits)),
        }
    }
}

/// 解码原始字节载荷。
pub fn decode_frame(payload: &[u8]) -> DecodedFrame {
    decode_hex(&hex::encode(payload))
}

/// 解码已渲染为十六进制文本的载荷。
///
/// 没有标记、或标记后没有数字 token 时该字段缺省，不是错误。
pub fn decode_hex(rendered: &str) -> DecodedFrame {
    let tokens: Vec<&str> = rendered
        .as_bytes()
        .chunks(2)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .rev()
        .collect();

    let mut frame = DecodedFrame::default();
    for (index, token) in tokens.iter().enumerate() {
        let Some(field) = Field::from_marker(token) else {
            continue;
        };
        let mut digits = String::new();
        for next in tokens[index + 1..].iter() {
            if !is_digit_pair(next) {
                break;
            }
            digits.insert_str(0, next);
        }
        if digits.is_empty() {
            continue;
        }
        frame.upsert(field, digits);
    }
    frame
}

fn is_digit_pair(token: &str) -> bool {
    token.len() == 2 && token.bytes().all(|byte| byte.is_ascii_digit())
}
