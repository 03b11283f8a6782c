use serde::{Deserialize, Serialize};
use std::process::Command;

/// External binaries the pipeline drives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
    Ffprobe,
    Chrome,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::Ffprobe => "ffprobe",
            ToolType::Chrome => "chrome",
        }
    }

    /// Binary names to look for, most specific first
    fn binary_names(&self) -> &'static [&'static str] {
        match self {
            ToolType::YtDlp => &["yt-dlp"],
            ToolType::Ffmpeg => &["ffmpeg"],
            ToolType::Ffprobe => &["ffprobe"],
            ToolType::Chrome => &["google-chrome", "chromium", "chromium-browser", "chrome"],
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg | ToolType::Ffprobe => "-version",
            ToolType::Chrome => "--version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

pub struct ToolManager;

impl ToolManager {
    pub fn new() -> Self {
        Self
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let name = tool_type.as_str().to_string();
        let (path, version) = match self.detect_tool(tool_type) {
            Some((path, version)) => (Some(path), version),
            None => (None, None),
        };

        ToolInfo {
            name,
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp),
            self.get_tool_info(ToolType::Ffmpeg),
            self.get_tool_info(ToolType::Ffprobe),
            self.get_tool_info(ToolType::Chrome),
        ]
    }

    /// Best path for `tool_type`, or its bare name so PATH lookup happens at spawn time
    pub fn resolve(&self, tool_type: ToolType) -> String {
        self.detect_tool(tool_type)
            .map(|(path, _)| path)
            .unwrap_or_else(|| tool_type.binary_names()[0].to_string())
    }

    /// Run the tool's version command; `None` when it cannot be executed
    pub fn probe(&self, path: &str, tool_type: ToolType) -> Option<String> {
        self.get_version(path, tool_type)
    }

    fn detect_tool(&self, tool_type: ToolType) -> Option<(String, Option<String>)> {
        for binary_name in tool_type.binary_names() {
            // 1. Try common paths first
            let common_paths = [
                format!("/opt/homebrew/bin/{}", binary_name),
                format!("/usr/local/bin/{}", binary_name),
                format!("/usr/bin/{}", binary_name),
            ];

            for path in common_paths {
                if std::path::Path::new(&path).exists() {
                    let version = self.get_version(&path, tool_type);
                    return Some((path, version));
                }
            }

            // 2. Try PATH
            if let Ok(output) = Command::new("which").arg(binary_name).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        let version = self.get_version(&path, tool_type);
                        return Some((path, version));
                    }
                }
            }
        }

        None
    }

    fn get_version(&self, path: &str, tool_type: ToolType) -> Option<String> {
        match Command::new(path).arg(tool_type.version_arg()).output() {
            Ok(output) if output.status.success() => {
                // ffmpeg prints a banner; the first line carries the version
                let out = String::from_utf8_lossy(&output.stdout);
                out.lines().next().map(|l| l.trim().to_string())
            }
            _ => None,
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}
