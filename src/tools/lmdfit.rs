//! Adapters for the lmdfit python utilities and binaries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::command::run_tool;
use super::{
    DataObjectBuilder, DataObjectRequest, FitRequest, Fitter, Merger, MergeRequest,
    OffsetEstimator,
};
use crate::error::ToolError;

/// Name of the interaction-point result written by `determineBeamOffset`.
pub const RECO_IP_FILE: &str = "reco_ip.json";

const CREATE_DATA_SCRIPT: &str = "createMultipleLmdData.py";
const MERGE_DATA_SCRIPT: &str = "mergeMultipleLmdData.py";
const FIT_SCRIPT: &str = "doMultipleLuminosityFits.py";
const BEAM_OFFSET_BINARY: &str = "determineBeamOffset";

/// Runs the lmdfit utilities from a script directory and a binary directory.
#[derive(Debug, Clone)]
pub struct LmdFitScripts {
    python: String,
    script_dir: PathBuf,
    bin_dir: PathBuf,
}

impl LmdFitScripts {
    pub fn new(
        python: impl Into<String>,
        script_dir: impl Into<PathBuf>,
        bin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python: python.into(),
            script_dir: script_dir.into(),
            bin_dir: bin_dir.into(),
        }
    }

    fn script(&self, name: &str) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.current_dir(&self.script_dir);
        cmd.arg(self.script_dir.join(name));
        cmd
    }

    fn data_object_command(&self, request: &DataObjectRequest<'_>) -> Command {
        let mut cmd = self.script(CREATE_DATA_SCRIPT);
        cmd.arg("--dir_pattern").arg(request.dir_pattern);
        if let Some(cross_section) = request.elastic_cross_section {
            cmd.arg("--elastic_cross_section")
                .arg(cross_section.to_string());
        }
        cmd.arg(request.lab_momentum.to_string())
            .arg(request.kind.code())
            .arg(request.dir)
            .arg(request.data_config);
        cmd
    }

    fn merge_command(&self, request: &MergeRequest<'_>) -> Command {
        let mut cmd = self.script(MERGE_DATA_SCRIPT);
        cmd.arg("--dir_pattern")
            .arg(request.dir_pattern)
            .arg(request.kind.code())
            .arg(request.dir);
        cmd
    }

    fn fit_command(&self, request: &FitRequest<'_>) -> Command {
        let mut cmd = self.script(FIT_SCRIPT);
        cmd.arg("--forced_box_gen_data")
            .arg(request.acceptance_dir)
            .arg(request.filtered_dir)
            .arg(request.dir_pattern)
            .arg(request.fit_config);
        cmd
    }

    fn offset_command(&self, merged_vertex_dir: &Path, fit_config: &Path) -> Command {
        let mut cmd = Command::new(self.bin_dir.join(BEAM_OFFSET_BINARY));
        cmd.current_dir(&self.bin_dir);
        cmd.arg("-p").arg(merged_vertex_dir).arg("-c").arg(fit_config);
        cmd
    }
}

#[async_trait]
impl DataObjectBuilder for LmdFitScripts {
    async fn build(&self, request: &DataObjectRequest<'_>) -> Result<(), ToolError> {
        run_tool(CREATE_DATA_SCRIPT, &mut self.data_object_command(request)).await?;
        Ok(())
    }
}

#[async_trait]
impl Merger for LmdFitScripts {
    async fn merge(&self, request: &MergeRequest<'_>) -> Result<(), ToolError> {
        run_tool(MERGE_DATA_SCRIPT, &mut self.merge_command(request)).await?;
        Ok(())
    }
}

#[async_trait]
impl Fitter for LmdFitScripts {
    async fn fit(&self, request: &FitRequest<'_>) -> Result<(), ToolError> {
        run_tool(FIT_SCRIPT, &mut self.fit_command(request)).await?;
        Ok(())
    }
}

#[async_trait]
impl OffsetEstimator for LmdFitScripts {
    async fn estimate(
        &self,
        merged_vertex_dir: &Path,
        fit_config: &Path,
    ) -> Result<PathBuf, ToolError> {
        run_tool(
            BEAM_OFFSET_BINARY,
            &mut self.offset_command(merged_vertex_dir, fit_config),
        )
        .await?;

        let result = merged_vertex_dir.join(RECO_IP_FILE);
        if !result.exists() {
            return Err(ToolError::InvalidOutput {
                tool: BEAM_OFFSET_BINARY.to_string(),
                message: format!("{} was not written", result.display()),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SampleKind;
    use std::ffi::OsStr;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn scripts() -> LmdFitScripts {
        LmdFitScripts::new("python3", "/opt/lmdfit/scripts", "/opt/build/bin")
    }

    #[test]
    fn test_data_object_command_with_cross_section() {
        let request = DataObjectRequest {
            kind: SampleKind::Angular,
            dir: Path::new("/data/reco"),
            dir_pattern: "xy_m_cut_real",
            lab_momentum: 1.5,
            data_config: Path::new("/opt/lmdfit/dataconfig_xy.json"),
            elastic_cross_section: Some(3.2),
        };
        let cmd = scripts().data_object_command(&request);

        assert_eq!(cmd.as_std().get_program(), OsStr::new("python3"));
        assert_eq!(
            args(&cmd),
            vec![
                "/opt/lmdfit/scripts/createMultipleLmdData.py",
                "--dir_pattern",
                "xy_m_cut_real",
                "--elastic_cross_section",
                "3.2",
                "1.5",
                "a",
                "/data/reco",
                "/opt/lmdfit/dataconfig_xy.json",
            ]
        );
    }

    #[test]
    fn test_merge_and_fit_commands() {
        let merge = scripts().merge_command(&MergeRequest {
            kind: SampleKind::Vertex,
            dir: Path::new("/data/uncut"),
            dir_pattern: "uncut",
        });
        assert_eq!(
            args(&merge)[1..],
            ["--dir_pattern", "uncut", "v", "/data/uncut"]
        );

        let fit = scripts().fit_command(&FitRequest {
            acceptance_dir: Path::new("/data/box"),
            filtered_dir: Path::new("/data/reco"),
            dir_pattern: "xy_m_cut_real",
            fit_config: Path::new("/opt/lmdfit/fitconfig-fast.json"),
        });
        assert_eq!(
            args(&fit)[1..],
            [
                "--forced_box_gen_data",
                "/data/box",
                "/data/reco",
                "xy_m_cut_real",
                "/opt/lmdfit/fitconfig-fast.json"
            ]
        );
    }

    #[test]
    fn test_offset_command_uses_bin_dir() {
        let cmd = scripts().offset_command(
            Path::new("/data/merge_data"),
            Path::new("/opt/lmdfit/vertex_fitconfig.json"),
        );
        assert_eq!(
            cmd.as_std().get_program(),
            OsStr::new("/opt/build/bin/determineBeamOffset")
        );
        assert_eq!(
            args(&cmd),
            ["-p", "/data/merge_data", "-c", "/opt/lmdfit/vertex_fitconfig.json"]
        );
    }
}
