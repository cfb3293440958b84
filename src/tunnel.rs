use std::io::Result;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const BUFFER_SIZE: usize = 32 * 1024;

/// Source of temporary buffers shared by all tunneling sessions.
/// Implementations must tolerate concurrent use.
pub trait BytesPool: Send + Sync {
    fn get(&self) -> Vec<u8>;
    fn put(&self, buf: Vec<u8>);
}

impl<P: BytesPool + ?Sized> BytesPool for std::sync::Arc<P> {
    fn get(&self) -> Vec<u8> {
        (**self).get()
    }

    fn put(&self, buf: Vec<u8>) {
        (**self).put(buf)
    }
}

/// Buffer borrowed from a [`BytesPool`], returned on drop. The session
/// future can be dropped or unwind mid-copy without leaking it, and the
/// pool sees each buffer exactly once.
pub(crate) struct PooledBuf<'a> {
    buf: Vec<u8>,
    pool: &'a dyn BytesPool,
}

impl<'a> PooledBuf<'a> {
    pub(crate) fn new(pool: &'a dyn BytesPool) -> Self {
        Self {
            buf: pool.get(),
            pool,
        }
    }

    pub(crate) fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

async fn copy_with<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}

/// Copies bytes between `a` and `b` in both directions until either
/// direction ends, then shuts down and drops both connections. The
/// losing direction's copy is dropped in place, so nothing outlives
/// this call.
pub(crate) async fn tunnel<A, B>(mut a: A, mut b: B, buf1: &mut [u8], buf2: &mut [u8]) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut read_a, mut write_a) = tokio::io::split(&mut a);
    let (mut read_b, mut write_b) = tokio::io::split(&mut b);

    let res = tokio::select! {
        res = copy_with(&mut read_a, &mut write_b, buf1) => res,
        res = copy_with(&mut read_b, &mut write_a, buf2) => res,
    };

    let _ = write_a.shutdown().await;
    let _ = write_b.shutdown().await;
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::duplex;

    struct CountingPool {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl CountingPool {
        fn new() -> Self {
            Self {
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }
    }

    impl BytesPool for CountingPool {
        fn get(&self) -> Vec<u8> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            vec![0u8; 64]
        }

        fn put(&self, _buf: Vec<u8>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn pooled_buffers_release_when_session_is_dropped_mid_copy() {
        let pool = CountingPool::new();

        // Both far ends stay open, so the tunnel never finishes on its
        // own and the timeout drops it mid-copy.
        let (a, _keep_a) = duplex(8);
        let (b, _keep_b) = duplex(8);
        let session = async {
            let mut buf1 = PooledBuf::new(&pool);
            let mut buf2 = PooledBuf::new(&pool);
            tunnel(a, b, buf1.as_mut(), buf2.as_mut()).await
        };
        assert!(tokio::time::timeout(Duration::from_millis(50), session)
            .await
            .is_err());

        assert_eq!(pool.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(pool.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tunnel_relays_both_directions_and_stops_on_close() {
        let (client_near, mut client_far) = duplex(64);
        let (server_near, mut server_far) = duplex(64);

        let handle = tokio::spawn(async move {
            let mut buf1 = vec![0u8; 16];
            let mut buf2 = vec![0u8; 16];
            tunnel(client_near, server_near, &mut buf1, &mut buf2).await
        });

        client_far.write_all(b"ping").await.unwrap();
        let mut got = [0u8; 4];
        server_far.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");

        server_far.write_all(b"pong").await.unwrap();
        client_far.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"pong");

        // Closing one side ends the tunnel.
        drop(client_far);
        handle.await.unwrap().unwrap();
    }
}
