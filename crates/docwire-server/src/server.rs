//! Length-prefixed TCP framing over [`session::Session`], grounded
//! directly on the teacher's `slate_server::server`: a non-blocking
//! accept loop that polls a SIGTERM flag, thread-per-connection, and a
//! drain-on-shutdown sequence that unblocks any handler parked on
//! `read_exact` by shutting down its read half.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use signal_hook::consts::SIGTERM;
use signal_hook::flag;

use docwire_collection::Database;
use docwire_store::Store;

use crate::protocol::Request;
use crate::session::Session;

pub struct Server<S: Store> {
    db: Arc<Database<S>>,
    addr: String,
}

impl<S: Store + Send + Sync + 'static> Server<S> {
    pub fn new(db: Database<S>, addr: impl Into<String>) -> Self {
        Self { db: Arc::new(db), addr: addr.into() }
    }

    pub fn serve(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.addr)?;
        tracing::info!(addr = %self.addr, "docwire-server listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        flag::register(SIGTERM, Arc::clone(&shutdown))?;

        listener.set_nonblocking(true)?;

        let connections: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let read_half = stream.try_clone()?;
                    connections.lock().unwrap().push(read_half);

                    let db = Arc::clone(&self.db);
                    handles.push(thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, db) {
                            tracing::warn!(error = %e, "connection error");
                        }
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept error");
                }
            }
        }

        tracing::info!("shutdown signal received, draining connections");

        for stream in connections.lock().unwrap().iter() {
            let _ = stream.shutdown(Shutdown::Read);
        }
        for handle in handles {
            let _ = handle.join();
        }

        tracing::info!("shutdown complete");
        Ok(())
    }
}

fn handle_connection<S: Store>(stream: TcpStream, db: Arc<Database<S>>) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new(db);
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf)?;

        let request: Request = rmp_serde::from_slice(&msg_buf)?;
        let response = session.handle(request);

        let response_bytes = rmp_serde::to_vec(&response)?;
        let response_len = (response_bytes.len() as u32).to_be_bytes();
        writer.write_all(&response_len)?;
        writer.write_all(&response_bytes)?;
        writer.flush()?;
    }
}
