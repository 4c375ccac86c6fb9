//! 记录与记录集 - 服务端集合成员的本地表示
//!
//! 记录是不透明的 JSON 文档，只有 `id` 对引擎可见；版本戳挂在集合上而不是
//! 单条记录上（粗粒度版本化是既定契约，不做 per-record 版本）。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 集合成员：不可变 id + 其余字段原样保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self { id: id.into(), fields }
    }

    /// 读取某个业务字段（引擎只在级联删除时用到）
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// 字段值按 id 语义转成字符串（服务端部分外键是数字）
    pub fn field_as_id(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// 本地记录集：按 id 合并，整体替换，顺序保留
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// 整表替换（参考集合 fullSync 的落地动作）
    pub fn replace_all(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    /// 冷启动分页追加（分页游标 = 当前本地条数，不去重，调用方负责先 clear）
    pub fn append_page(&mut self, records: Vec<Record>) {
        self.records.extend(records);
    }

    /// 增量合并：按到达顺序的**倒序**应用，同 id 已存在则原地更新，否则插到最前。
    ///
    /// 服务端增量页按最新在前返回；倒序应用使同一页里出现两次的 id
    /// （短时间内连续编辑）以最新一条为准。
    pub fn merge(&mut self, incoming: Vec<Record>) {
        for record in incoming.into_iter().rev() {
            if let Some(existing) = self.records.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            } else {
                self.records.insert(0, record);
            }
        }
    }

    /// 按 id 删除，返回是否删到
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() != before
    }

    /// 按谓词保留（级联删除子行时使用）
    pub fn retain<F: FnMut(&Record) -> bool>(&mut self, keep: F) {
        self.records.retain(keep);
    }
}
