//! 规划层：规划、路由、重规划与最终回复
//!
//! 四个组件各自持有注入的 LLM 客户端；LLM 失败时都有确定性的降级路径。

pub mod planner;
pub mod prompts;
pub mod replanner;
pub mod responder;
pub mod router;

pub use planner::{parse_numbered_steps, Planner};
pub use replanner::{filter_new_steps, parse_replan_reply, ReplanDecision, Replanner};
pub use responder::{preprocess_result, Responder, NO_INFORMATION};
pub use router::{keyword_route, parse_route_answer, Route, Router};
