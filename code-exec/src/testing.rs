//! In-process [`ContainerRuntime`] for tests.
//!
//! Each created container follows a [`Script`] chosen from its spec, and the
//! runtime counts lifecycle calls so tests can check cleanup and admission.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::{
    error::Error,
    sandbox::{finish_output, push_limited, ContainerRuntime, ContainerSpec},
    Result,
};

/// Exit status reported for a container that was stopped.
pub const STOPPED_EXIT_CODE: i64 = 137;

/// What a scripted container does once started
#[derive(Debug, Clone)]
pub struct Script {
    pub exit_code: i64,
    pub output: String,
    /// `None` runs until stopped
    pub runs_for: Option<Duration>,
}

impl Script {
    pub fn exits(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            runs_for: Some(Duration::ZERO),
        }
    }

    pub fn hangs(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            runs_for: None,
        }
    }

    pub fn running_for(mut self, duration: Duration) -> Self {
        self.runs_for = Some(duration);
        self
    }
}

/// Runtime operation to fail with an infrastructure error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Create,
    Start,
    Wait,
    Logs,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Exited,
}

struct Container {
    script: Script,
    state: State,
    stop: Arc<Notify>,
}

type Handler = Box<dyn Fn(&ContainerSpec) -> Script + Send + Sync>;

pub struct ScriptedRuntime {
    handler: Handler,
    fault: Mutex<Option<Fault>>,
    containers: Mutex<HashMap<String, Container>>,
    specs: Mutex<Vec<ContainerSpec>>,
    images: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    stopped: AtomicUsize,
    removed: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new(|_| Script::exits(0, ""))
    }
}

impl ScriptedRuntime {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ContainerSpec) -> Script + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            fault: Mutex::new(None),
            containers: Mutex::new(HashMap::new()),
            specs: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    /// Every container runs `script`
    pub fn with_script(script: Script) -> Self {
        Self::new(move |_| script.clone())
    }

    /// Echo the submitted source back as output after `delay`
    pub fn echo(delay: Duration) -> Self {
        Self::new(move |spec| {
            Script::exits(0, spec.source_code().unwrap_or_default()).running_for(delay)
        })
    }

    pub fn fail_on(&self, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    pub fn clear_fault(&self) {
        *self.fault.lock().unwrap() = None;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Containers created and not yet removed
    pub fn live(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of containers ever running at once
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.images.lock().unwrap().clone()
    }

    fn check(&self, op: Fault) -> Result<()> {
        if *self.fault.lock().unwrap() == Some(op) {
            return Err(Error::Sandbox(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn set_exited(&self, id: &str) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(id) {
            if container.state == State::Running {
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
            container.state = State::Exited;
        }
    }

    fn no_such_container(id: &str) -> Error {
        Error::Sandbox(format!("No such container: {}", id))
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let mut images = self.images.lock().unwrap();
        if !images.iter().any(|known| known == image) {
            images.push(image.to_string());
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.check(Fault::Create)?;
        let id = format!("scripted-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let container = Container {
            script: (self.handler)(spec),
            state: State::Created,
            stop: Arc::new(Notify::new()),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), container);
        self.specs.lock().unwrap().push(spec.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.check(Fault::Start)?;
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| Self::no_such_container(id))?;
        if container.state == State::Created {
            container.state = State::Running;
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(now, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        self.check(Fault::Wait)?;
        let (runs_for, exit_code, stop) = {
            let containers = self.containers.lock().unwrap();
            let container = containers.get(id).ok_or_else(|| Self::no_such_container(id))?;
            if container.state == State::Exited {
                return Ok(STOPPED_EXIT_CODE);
            }
            (
                container.script.runs_for,
                container.script.exit_code,
                container.stop.clone(),
            )
        };

        let exit_code = match runs_for {
            Some(duration) => tokio::select! {
                _ = tokio::time::sleep(duration) => exit_code,
                _ = stop.notified() => STOPPED_EXIT_CODE,
            },
            None => {
                stop.notified().await;
                STOPPED_EXIT_CODE
            }
        };
        self.set_exited(id);
        Ok(exit_code)
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<String> {
        self.check(Fault::Logs)?;
        let containers = self.containers.lock().unwrap();
        let container = containers.get(id).ok_or_else(|| Self::no_such_container(id))?;
        let mut buf = Vec::new();
        let complete = push_limited(&mut buf, container.script.output.as_bytes(), limit);
        Ok(finish_output(buf, !complete))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        let stop = {
            let containers = self.containers.lock().unwrap();
            let container = containers.get(id).ok_or_else(|| Self::no_such_container(id))?;
            container.stop.clone()
        };
        stop.notify_one();
        self.set_exited(id);
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.check(Fault::Remove)?;
        self.set_exited(id);
        let container = self
            .containers
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| Self::no_such_container(id))?;
        container.stop.notify_one();
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
