// 运行时执行引擎模块

mod dispatcher;
mod engine;
mod types;

pub use dispatcher::ActionDispatcher;
pub use engine::ExecutionEngine;
pub use types::{ActionOutput, Prompt, StepResult};
