use serde_json::Value;

/// 把 `from` 深度合并进 `to`
///
/// - 对象逐键递归合并，`null` 值忽略
/// - 键以 `+` 结尾时把列表追加到目标末尾，以 `+` 开头时插到目标开头
/// - 其余列表整体替换，`list_append` 为真时改为追加
/// - 标量直接覆盖
pub fn merge_json(from: &Value, to: &mut Value, list_append: bool) {
    let Value::Object(from_map) = from else {
        if !from.is_null() {
            *to = from.clone();
        }
        return;
    };
    if !to.is_object() {
        *to = Value::Object(Default::default());
    }
    let Value::Object(to_map) = to else {
        return;
    };

    for (raw_key, value) in from_map {
        if value.is_null() {
            continue;
        }

        let (key, mode) = if let Some(key) = raw_key.strip_suffix('+') {
            (key, ListMode::Append)
        } else if let Some(key) = raw_key.strip_prefix('+') {
            (key, ListMode::Prepend)
        } else if list_append {
            (raw_key.as_str(), ListMode::Append)
        } else {
            (raw_key.as_str(), ListMode::Replace)
        };

        match value {
            Value::Object(_) => {
                let target = to_map.entry(key.to_string()).or_insert(Value::Null);
                merge_json(value, target, list_append);
            }
            Value::Array(items) if mode != ListMode::Replace => {
                let target = to_map.entry(key.to_string()).or_insert(Value::Null);
                let mut existing = match target.take() {
                    Value::Array(existing) => existing,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                if mode == ListMode::Append {
                    existing.extend(items.iter().cloned());
                } else {
                    let mut merged = items.clone();
                    merged.append(&mut existing);
                    existing = merged;
                }
                *target = Value::Array(existing);
            }
            _ => {
                to_map.insert(key.to_string(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMode {
    Replace,
    Append,
    Prepend,
}
