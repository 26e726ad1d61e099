//! 互补步骤批量执行
//!
//! 以第一个待执行步骤为基准，依次比较后续步骤；遇到第一个不互补的步骤即停止。
//! 互补规则（中英西三语关键词不区分大小写）：
//! - 创建任务 + 创建任务
//! - 列出 + 完成 / 删除 / 编辑
//! - 搜索 + 完成 / 删除 / 编辑
//! - 天气 + 建议

const CREATE: &[&str] = &["create", "add ", "crear", "agregar", "añadir"];
const TASK: &[&str] = &["task", "to-do", "todo", "tarea"];
const LIST: &[&str] = &["list", "show", "listar", "mostrar"];
const SEARCH: &[&str] = &["search", "find", "look for", "buscar"];
const MODIFY: &[&str] = &[
    "complete", "mark", "delete", "remove", "edit", "update", "completar", "marcar",
    "eliminar", "borrar", "editar", "actualizar",
];
const WEATHER: &[&str] = &["weather", "forecast", "temperature", "clima", "tiempo", "pronóstico"];
const ADVICE: &[&str] = &["advice", "recommend", "what to wear", "consejo", "recomend", "ropa"];

fn has_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 两个步骤是否可以交给同一次执行器调用
pub fn complementary(first: &str, next: &str) -> bool {
    let first = first.to_lowercase();
    let next = next.to_lowercase();

    (has_any(&first, CREATE) && has_any(&first, TASK) && has_any(&next, CREATE) && has_any(&next, TASK))
        || (has_any(&first, LIST) && has_any(&next, MODIFY))
        || (has_any(&first, SEARCH) && has_any(&next, MODIFY))
        || (has_any(&first, WEATHER) && has_any(&next, ADVICE))
}

/// 本次要执行的步骤数（至少 1，最多 max_batch）
pub fn batch_len(plan: &[String], max_batch: usize) -> usize {
    let Some(first) = plan.first() else {
        return 0;
    };
    let limit = plan.len().min(max_batch.max(1));
    let mut n = 1;
    while n < limit && complementary(first, &plan[n]) {
        n += 1;
    }
    n
}
