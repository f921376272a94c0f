/// The operator machine's OS, as reported in the worker's `agent_hello`
/// frame and carried alongside its SSH connection details. Determines
/// whether commands are quoted for POSIX `sh` or run through
/// `powershell -EncodedCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}
