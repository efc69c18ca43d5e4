//! 本地端口分配
//!
//! 外部插件与端口映射入站需要在构建时拿到空闲端口。分配器在进程内共享，
//! 实现必须是线程安全的，并保证同一进程内不重复返回仍在使用的端口。

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};

/// 端口分配器
pub trait PortAllocator: Send + Sync {
    /// 返回一个当前空闲的本地端口
    fn allocate(&self) -> io::Result<u16>;

    /// 归还端口，之后可以被再次分配
    fn release(&self, _port: u16) {}
}

const MAX_ATTEMPTS: usize = 64;

/// 通过绑定 127.0.0.1:0 获取系统分配的空闲端口
#[derive(Default)]
pub struct LocalPortAllocator {
    allocated: Mutex<HashSet<u16>>,
}

impl LocalPortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已分配且尚未归还的端口数
    pub fn in_use(&self) -> usize {
        self.allocated.lock().len()
    }
}

impl PortAllocator for LocalPortAllocator {
    fn allocate(&self) -> io::Result<u16> {
        let mut allocated = self.allocated.lock();
        for _ in 0..MAX_ATTEMPTS {
            // 绑定后立即释放，端口在返回前确实空闲
            let port = TcpListener::bind(("127.0.0.1", 0))?.local_addr()?.port();
            if allocated.insert(port) {
                return Ok(port);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no free local port",
        ))
    }

    fn release(&self, port: u16) {
        self.allocated.lock().remove(&port);
    }
}

/// 从固定起点递增分配，不检查端口占用；用于导出配置与测试
pub struct SequentialPortAllocator {
    next: AtomicU16,
}

impl SequentialPortAllocator {
    pub fn new(start: u16) -> Self {
        Self {
            next: AtomicU16::new(start),
        }
    }
}

impl PortAllocator for SequentialPortAllocator {
    fn allocate(&self) -> io::Result<u16> {
        let port = self.next.fetch_add(1, Ordering::SeqCst);
        if port == u16::MAX {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "port range exhausted",
            ));
        }
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_allocator_unique() {
        let allocator = LocalPortAllocator::new();
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_ne!(a, b);
        assert!(a > 0 && b > 0);

        allocator.release(a);
        assert!(!allocator.allocated.lock().contains(&a));
        assert_eq!(allocator.in_use(), 1);
    }

    #[test]
    fn test_local_allocator_reuse_after_release() {
        let allocator = LocalPortAllocator::new();
        for _ in 0..500 {
            let ports = [allocator.allocate().unwrap(), allocator.allocate().unwrap()];
            for port in ports {
                allocator.release(port);
            }
        }
        assert_eq!(allocator.in_use(), 0);
    }

    #[test]
    fn test_sequential_allocator() {
        let allocator = SequentialPortAllocator::new(30000);
        assert_eq!(allocator.allocate().unwrap(), 30000);
        assert_eq!(allocator.allocate().unwrap(), 30001);

        let allocator = SequentialPortAllocator::new(u16::MAX);
        assert!(allocator.allocate().is_err());
    }
}
