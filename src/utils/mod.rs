//! 工具模块

pub mod emitter;

pub use emitter::Emitter;

use rand::Rng;

/// 生成指定长度的随机字符串（订单 ID 用）
pub fn random_str(length: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// 异步投递：有 tokio 运行时则 spawn，否则原地调用
///
/// 用户回调都经这里投递，慢回调不会卡住合并路径。
pub(crate) fn spawn_or_call<F: FnOnce() + Send + 'static>(f: F) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_str_length_and_charset() {
        let s = random_str(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_str_uniqueness() {
        assert_ne!(random_str(16), random_str(16));
    }
}
