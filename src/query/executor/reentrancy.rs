//! 线程内的执行上下文
//!
//! 记录当前线程正在执行的 [`QueryManager`] 以及嵌套深度。函数表达式在渲染
//! 或摘要过程中触发另一次查询时，通过 [`QueryManager::current`] 取得外层的
//! 管理器。计数在调用返回时递减，只记录深度，不缓存任何结果。

use std::cell::RefCell;
use std::sync::Arc;

use super::QueryManager;

thread_local! {
    static CONTEXT: RefCell<Vec<(QueryManager, usize)>> = const { RefCell::new(Vec::new()) };
}

/// 进入执行上下文，释放时退出
pub(crate) struct ContextGuard {
    _private: (),
}

pub(crate) fn enter(manager: &QueryManager) -> ContextGuard {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        match context.last_mut() {
            Some((current, depth)) if Arc::ptr_eq(&current.inner, &manager.inner) => *depth += 1,
            _ => context.push((manager.clone(), 1)),
        }
    });
    ContextGuard { _private: () }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            let finished = match context.last_mut() {
                Some((_, depth)) => {
                    *depth -= 1;
                    *depth == 0
                }
                None => false,
            };
            if finished {
                context.pop();
            }
        });
    }
}

impl QueryManager {
    /// 当前线程正在执行的管理器
    pub fn current() -> Option<QueryManager> {
        CONTEXT.with(|context| context.borrow().last().map(|(manager, _)| manager.clone()))
    }

    /// 当前线程的嵌套执行深度
    pub fn depth() -> usize {
        CONTEXT.with(|context| context.borrow().last().map(|(_, depth)| *depth).unwrap_or(0))
    }
}
