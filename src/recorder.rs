use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info};

enum Commands {
    Store(String),
    Quit,
}

/// Appends log lines to a file from a worker thread, so a slow disk never
/// stalls the dashboard.
pub struct Recorder {
    worker: Option<JoinHandle<()>>,
    command_sender: Sender<Commands>,
    pub path: PathBuf,
}

impl Recorder {
    pub fn new(path: PathBuf) -> std::io::Result<Self> {
        let output_file = File::create(&path)?;
        let (command_sender, command_receiver) = unbounded::<Commands>();
        let path_copy = path.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = work(BufWriter::new(output_file), command_receiver) {
                error!("Recording to {:?} failed: {}", path_copy, err);
            }
        });
        Ok(Recorder {
            worker: Some(handle),
            command_sender,
            path,
        })
    }

    pub fn default_path() -> PathBuf {
        let now: DateTime<Local> = Local::now();
        let mut path = PathBuf::new();
        path.push(format!("{}-traffic.log", now.format("%Y-%m-%d_%H-%M")));
        path
    }

    pub fn new_with_default_file() -> std::io::Result<Self> {
        let path = Self::default_path();
        info!("Recording data to {:?}", path);
        Self::new(path)
    }

    pub fn store(&mut self, line: &str) {
        if self.command_sender.send(Commands::Store(line.to_string())).is_err() {
            error!("Recorder for {:?} is gone", self.path);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.command_sender.send(Commands::Quit);
        self.worker.take().map(JoinHandle::join);
    }
}

fn work(mut output: impl Write, receiver: Receiver<Commands>) -> std::io::Result<()> {
    loop {
        match receiver.recv() {
            Ok(Commands::Store(line)) => {
                output.write_all(line.as_bytes())?;
                output.write_all(b"\n")?;
            }
            Ok(Commands::Quit) | Err(_) => {
                output.flush()?;
                return Ok(());
            }
        }
    }
}
