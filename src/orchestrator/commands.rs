//! Construction of every external command the pipeline runs.
//!
//! Keeping the command lines in one place means the fallback command shown to
//! the operator is exactly the one that was attempted.

use super::executor::{ToolInvocation, ToolOperation};
use crate::config::{PartitionProfile, ProvisionConfig, TimeoutConfig, ToolchainConfig};
use crate::models::DeviceTarget;
use std::path::{Path, PathBuf};

/// Builds invocations for one run's toolchain, project and device.
#[derive(Debug, Clone)]
pub struct Toolchain {
    tools: ToolchainConfig,
    timeouts: TimeoutConfig,
    project_dir: PathBuf,
}

impl Toolchain {
    pub fn new(config: &ProvisionConfig) -> Self {
        Toolchain {
            tools: config.toolchain.clone(),
            timeouts: config.timeouts.clone(),
            project_dir: config.project_dir.clone(),
        }
    }

    pub fn build_tool(&self) -> &str {
        &self.tools.build_tool
    }

    pub fn flash_tool(&self) -> &str {
        &self.tools.flash_tool
    }

    fn invocation(
        &self,
        operation: ToolOperation,
        program: &str,
        args: Vec<String>,
        working_dir: Option<&Path>,
        timeout: std::time::Duration,
    ) -> ToolInvocation {
        ToolInvocation {
            operation,
            program: program.to_string(),
            args,
            working_dir: working_dir.map(Path::to_path_buf),
            timeout,
        }
    }

    /// `<tool> --version`
    pub fn version_query(&self, program: &str) -> ToolInvocation {
        self.invocation(
            ToolOperation::Version,
            program,
            args(&["--version"]),
            None,
            self.timeouts.version(),
        )
    }

    /// `<build_tool> run -e <env>` in the project directory
    pub fn build(&self, target: &DeviceTarget) -> ToolInvocation {
        self.invocation(
            ToolOperation::Build,
            &self.tools.build_tool,
            args(&["run", "-e", target.build_env()]),
            Some(&self.project_dir),
            self.timeouts.build(),
        )
    }

    /// `<build_tool> run -e <env> -t <filesystem_target>` in the project directory
    pub fn build_filesystem(&self, target: &DeviceTarget) -> ToolInvocation {
        self.invocation(
            ToolOperation::BuildFilesystem,
            &self.tools.build_tool,
            args(&["run", "-e", target.build_env(), "-t", &self.tools.filesystem_target]),
            Some(&self.project_dir),
            self.timeouts.build(),
        )
    }

    /// `<flash_tool> --port <port> erase_flash`
    pub fn erase(&self, target: &DeviceTarget) -> ToolInvocation {
        self.invocation(
            ToolOperation::Erase,
            &self.tools.flash_tool,
            args(&["--port", target.port(), "erase_flash"]),
            None,
            self.timeouts.erase(),
        )
    }

    /// `<build_tool> run -e <env> [-t nobuild] -t upload --upload-port <port>`
    pub fn upload_firmware(&self, target: &DeviceTarget, skip_build: bool) -> ToolInvocation {
        let mut argv = args(&["run", "-e", target.build_env()]);
        if skip_build {
            argv.extend(args(&["-t", "nobuild"]));
        }
        argv.extend(args(&["-t", "upload", "--upload-port", target.port()]));

        self.invocation(
            ToolOperation::UploadFirmware,
            &self.tools.build_tool,
            argv,
            Some(&self.project_dir),
            self.timeouts.upload(),
        )
    }

    /// `<flash_tool> --port <port> --baud <baud> write_flash <offset> <image>`
    pub fn write_filesystem(
        &self,
        target: &DeviceTarget,
        partition: &PartitionProfile,
        image: &Path,
    ) -> ToolInvocation {
        let baud = self.tools.flash_baud.to_string();
        let offset = partition.offset_hex();
        let image = image.display().to_string();

        self.invocation(
            ToolOperation::WriteFlash,
            &self.tools.flash_tool,
            args(&["--port", target.port(), "--baud", &baud, "write_flash", &offset, &image]),
            None,
            self.timeouts.filesystem(),
        )
    }

    /// Monitor command printed as the first next step.
    pub fn monitor_command(&self, target: &DeviceTarget) -> String {
        format!("{} device monitor -p {}", self.tools.build_tool, target.port())
    }

    /// Manual way to produce the filesystem image.
    pub fn manual_filesystem_build(&self, target: &DeviceTarget) -> String {
        format!(
            "{} run -e {} -t {}",
            self.tools.build_tool,
            target.build_env(),
            self.tools.filesystem_target
        )
    }
}

/// How to install a missing tool, for the well-known ones.
pub fn install_hint(program: &str) -> Option<String> {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "platformio" | "pio" => Some("pip install platformio".to_string()),
        "esptool.py" | "esptool" => Some("pip install esptool".to_string()),
        _ => None,
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profiles::get_profile;

    fn toolchain() -> (Toolchain, DeviceTarget) {
        let mut config = ProvisionConfig::default();
        config.resolve_paths(Path::new("/work"));
        (
            Toolchain::new(&config),
            DeviceTarget::new("/dev/ttyUSB0", "esp32dev").unwrap(),
        )
    }

    #[test]
    fn test_build_runs_in_project_dir() {
        let (toolchain, target) = toolchain();
        let inv = toolchain.build(&target);
        assert_eq!(inv.display(), "platformio run -e esp32dev");
        assert_eq!(inv.working_dir, Some(PathBuf::from("/work/hardware")));
        assert_eq!(inv.operation, ToolOperation::Build);
    }

    #[test]
    fn test_upload_firmware_no_build_flag() {
        let (toolchain, target) = toolchain();
        assert_eq!(
            toolchain.upload_firmware(&target, false).display(),
            "platformio run -e esp32dev -t upload --upload-port /dev/ttyUSB0"
        );
        assert_eq!(
            toolchain.upload_firmware(&target, true).display(),
            "platformio run -e esp32dev -t nobuild -t upload --upload-port /dev/ttyUSB0"
        );
    }

    #[test]
    fn test_write_filesystem_uses_profile_offset() {
        let (toolchain, target) = toolchain();
        let profile = get_profile("huge_app").unwrap();
        let inv = toolchain.write_filesystem(&target, &profile, Path::new("/img/spiffs.bin"));
        assert_eq!(
            inv.display(),
            "esptool.py --port /dev/ttyUSB0 --baud 921600 write_flash 0x291000 /img/spiffs.bin"
        );
        // The image path is taken as given, not relative to the project
        assert_eq!(inv.working_dir, None);
    }

    #[test]
    fn test_erase_and_version() {
        let (toolchain, target) = toolchain();
        assert_eq!(
            toolchain.erase(&target).display(),
            "esptool.py --port /dev/ttyUSB0 erase_flash"
        );
        assert_eq!(toolchain.erase(&target).working_dir, None);
        assert_eq!(
            toolchain.version_query("esptool.py").display(),
            "esptool.py --version"
        );
    }

    #[test]
    fn test_install_hints() {
        assert_eq!(install_hint("platformio").as_deref(), Some("pip install platformio"));
        assert_eq!(install_hint("/usr/bin/esptool.py").as_deref(), Some("pip install esptool"));
        assert_eq!(install_hint("make"), None);
    }
}
