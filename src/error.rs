use thiserror::Error;

use crate::models::{FileType, Part, Scheme};

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("未找到导入文件: {0}")]
    FileNotFound(String),

    #[error("不支持的文件格式: .{0}（仅支持 .csv/.xlsx/.xls/.ods）")]
    UnsupportedFormat(String),

    #[error("读取表格失败: {0}")]
    SheetRead(String),

    #[error("表格中没有找到工作表")]
    MissingWorksheet,

    #[error("表格中没有数据行，请检查文件内容是否正确")]
    TooFewRows,

    #[error("缺少必要列: {field}（{label}）")]
    MissingColumn {
        field: &'static str,
        label: &'static str,
    },

    #[error("{0}中没有找到有效的数据行，请检查文件格式和内容")]
    NoValidRows(&'static str),

    #[error("账期缺少必要数据: part={part} scheme={scheme}")]
    MissingScheme { part: Part, scheme: Scheme },

    #[error("账期没有可处理的{0}原始记录")]
    NoRecords(FileType),

    #[error("账期不存在: {0}")]
    PeriodNotFound(i64),

    #[error("没有可复制的历史花名册")]
    NoRosterToCopy,

    #[error("{0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    #[error("读取配置失败: {0}")]
    Config(#[from] envy::Error),
}

impl LedgerError {
    /// Coarse class used by callers to decide what the user has to fix.
    pub fn category(&self) -> &'static str {
        match self {
            Self::FileNotFound(_)
            | Self::UnsupportedFormat(_)
            | Self::SheetRead(_)
            | Self::MissingWorksheet
            | Self::TooFewRows
            | Self::MissingColumn { .. } => "STRUCTURAL_ERROR",
            Self::NoValidRows(_) | Self::NoRecords(_) | Self::NoRosterToCopy => "NO_DATA_ERROR",
            Self::MissingScheme { .. } => "COMPLETENESS_ERROR",
            Self::PeriodNotFound(_) | Self::InvalidInput(_) => "VALIDATION_ERROR",
            Self::Storage { .. } | Self::Io { .. } | Self::Csv { .. } => "PERSISTENCE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub(crate) trait StorageContext<T> {
    fn step(self, context: &str) -> LedgerResult<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn step(self, context: &str) -> LedgerResult<T> {
        self.map_err(|source| LedgerError::Storage {
            context: context.to_string(),
            source,
        })
    }
}
