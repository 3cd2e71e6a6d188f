use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const STARTED_PREFIX: &str = "[sync-proxy] started at port ";

pub fn can_bind_local_ports() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

pub fn wait_for<F>(timeout: Duration, mut f: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

pub fn server_command(extra: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_syncproxy-server"));
    cmd.args(["--host", "127.0.0.1"])
        .args(extra)
        .env("RUST_LOG", "warn")
        .env_remove("SYNCPROXY_PORT")
        .env_remove("SYNCPROXY_HOST")
        .env_remove("SYNCPROXY_MODE")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    cmd
}

pub struct TestServer {
    child: Option<Child>,
    pub port: u16,
    _stdout: BufReader<ChildStdout>,
}

#[allow(dead_code)]
impl TestServer {
    /// Start the server on an ephemeral port in routing `mode`.
    pub fn start(mode: &str) -> Self {
        Self::start_with(&["--mode", mode, "0"])
    }

    pub fn start_with(args: &[&str]) -> Self {
        let mut child = server_command(args)
            .spawn()
            .expect("failed to start syncproxy-server");
        let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        let mut line = String::new();
        loop {
            line.clear();
            let n = stdout.read_line(&mut line).expect("read server stdout");
            if n == 0 {
                let _ = child.kill();
                let _ = child.wait();
                panic!("syncproxy-server exited before announcing its port");
            }
            if let Some(port) = line.trim().strip_prefix(STARTED_PREFIX) {
                let port = port.parse().expect("numeric port");
                return Self {
                    child: Some(child),
                    port,
                    _stdout: stdout,
                };
            }
        }
    }

    pub fn client(&self) -> TestClient {
        TestClient::connect(self.port)
    }

    /// Connect `n` clients and wait until the router relays between all of
    /// them. Only usable in modes that relay plain text.
    pub fn clients(&self, n: usize) -> Vec<TestClient> {
        let mut clients: Vec<TestClient> = (0..n).map(|_| self.client()).collect();
        for i in 1..n {
            let (first, rest) = clients.split_at_mut(1);
            let ready = wait_for(Duration::from_secs(5), || {
                rest[i - 1].write_line("sync");
                first[0]
                    .read_frame(b'\n', Duration::from_millis(100))
                    .is_some()
            });
            assert!(ready, "client {} was never registered", i);
        }
        for client in clients.iter_mut() {
            while !client.reads_nothing() {}
        }
        clients
    }

    /// Send SIGTERM and wait for the process to exit.
    pub fn terminate(&mut self) -> std::process::ExitStatus {
        let mut child = self.child.take().expect("server already stopped");
        let status = Command::new("kill")
            .args(["-TERM", &child.id().to_string()])
            .status()
            .expect("run kill");
        assert!(status.success(), "kill -TERM failed");
        child.wait().expect("wait for server")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

pub struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

#[allow(dead_code)]
impl TestClient {
    pub fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to router");
        stream.set_nodelay(true).ok();
        let writer = stream.try_clone().expect("clone stream");
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    pub fn write_frame(&mut self, frame: &[u8], separator: u8) {
        self.writer.write_all(frame).expect("write frame");
        self.writer.write_all(&[separator]).expect("write separator");
        self.writer.flush().expect("flush");
    }

    pub fn write_line(&mut self, line: &str) {
        self.write_frame(line.as_bytes(), b'\n');
    }

    /// Read one frame, or `None` when nothing arrives within `timeout` or the
    /// connection is closed.
    pub fn read_frame(&mut self, separator: u8, timeout: Duration) -> Option<Vec<u8>> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .expect("set read timeout");
        let mut buf = Vec::new();
        match self.reader.read_until(separator, &mut buf) {
            Ok(0) => None,
            Ok(_) if buf.last() == Some(&separator) => {
                buf.pop();
                Some(buf)
            }
            Ok(_) => None,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(e) => panic!("read failed: {}", e),
        }
    }

    pub fn read_line(&mut self) -> Option<String> {
        self.read_frame(b'\n', Duration::from_secs(5))
            .map(|b| String::from_utf8(b).expect("utf-8 line"))
    }

    /// True when nothing arrives within a short window.
    pub fn reads_nothing(&mut self) -> bool {
        self.read_frame(b'\n', Duration::from_millis(150)).is_none()
    }

    /// True once the server has closed the connection.
    pub fn is_closed(&mut self) -> bool {
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
        let mut rest = Vec::new();
        match self.reader.read_to_end(&mut rest) {
            Ok(_) => true,
            Err(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ),
        }
    }
}

/// Deterministic pseudo-random text, rendered like a list of signed bytes.
pub fn random_text(seed: u64, bytes: usize) -> String {
    let mut state = seed.max(1);
    let mut out = String::with_capacity(bytes * 5);
    out.push('[');
    for i in 0..bytes {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&(state as i8).to_string());
    }
    out.push(']');
    out
}
