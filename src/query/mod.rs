//! 查询模块
//!
//! - `template`: 模板编译与多阶段渲染
//! - `filter`: 渲染过滤器
//! - `source`: 查询定义与查询来源
//! - `executor`: 执行与结果摘要

pub mod executor;
pub mod filter;
pub mod source;
pub mod template;

pub use executor::{DataDigester, QueryManager, Record, RecordDigester, RowView};
pub use filter::{BulkQueryFilter, FilterVerdict, MapQueryFilter, QueryFilter, RowsBulkFilter};
pub use source::{QueryDefinition, QuerySource, StaticQuerySource, TemplatePart};
pub use template::{BulkQuery, QueryTemplate, RenderedQuery};
