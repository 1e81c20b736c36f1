// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crawlship::application::{BuildStage, RuntimeAssembler};
use crawlship::config::settings::Settings;
use crawlship::domain::models::artifact::ArtifactVersion;
use crawlship::domain::models::handoff::BuildOutput;
use crawlship::domain::models::image::ImageReceipt;
use crawlship::domain::repositories::artifact_store::ArtifactStore;
use crawlship::domain::services::environment_installer::PackageResolver;
use crawlship::infrastructure::resolvers::IndexResolver;
use crawlship::infrastructure::storage::LocalArtifactStore;
use crawlship::utils::errors::PipelineError;
use tempfile::TempDir;

/// 一个完整的测试流水线：爬虫项目、离线包索引与位于临时目录下的运行时镜像
#[allow(dead_code)]
pub struct TestPipeline {
    pub dir: TempDir,
    pub settings: Settings,
}

pub fn create_test_pipeline() -> TestPipeline {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(root, "source/scrapy.cfg", "[settings]\ndefault = myproject.settings\n");
    write(root, "source/myproject/__init__.py", "");
    write(
        root,
        "source/myproject/settings.py",
        "BOT_NAME = 'myproject'\nSPIDER_MODULES = ['myproject.spiders']\n",
    );
    write(
        root,
        "source/myproject/items.py",
        "import scrapy\n\n\nclass QuoteItem(scrapy.Item):\n    text = scrapy.Field()\n",
    );
    write(root, "source/myproject/spiders/__init__.py", "");
    write(
        root,
        "source/myproject/spiders/quotes.py",
        "import scrapy\nfrom bs4 import BeautifulSoup\n\nfrom myproject.items import QuoteItem\n",
    );

    write(
        root,
        "index/index.json",
        r#"{"packages": {
            "Scrapy": ["2.11.0", "2.11.2"],
            "beautifulsoup4": ["4.12.3"],
            "Cython": ["3.0.10"]
        }}"#,
    );
    write(root, "index/scrapy/2.11.2/__init__.py", "");
    write(root, "index/beautifulsoup4/4.12.3/__init__.py", "");
    write(root, "index/cython/3.0.10/__init__.py", "");

    let config = format!(
        r#"
[project]
name = "myproject"
source = '{root}/source'

[build]
output_dir = '{root}/dist'

[resolver]
kind = "index"
index_path = '{root}/index'

[store]
root = "/store"

[image]
root = '{root}/image'

[service]
bind_address = "127.0.0.1"
"#,
        root = root.display()
    );
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(config.as_bytes()).unwrap();
    let settings = Settings::load(Some(file.path())).unwrap();

    TestPipeline { dir, settings }
}

pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[allow(dead_code)]
impl TestPipeline {
    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn resolver(&self) -> Arc<dyn PackageResolver> {
        Arc::new(IndexResolver::new(self.path("index")))
    }

    pub fn store(&self) -> LocalArtifactStore {
        LocalArtifactStore::from_settings(
            self.settings.image_path(&self.settings.store.root),
            &self.settings.store,
        )
    }

    /// 以仓库中的下一个版本运行构建阶段
    pub async fn build(&self) -> Result<BuildOutput, PipelineError> {
        let version: ArtifactVersion = self.store().next_version("myproject").await?;
        BuildStage::new(&self.settings, self.resolver())?
            .run(version)
            .await
    }

    pub async fn deploy(&self) -> Result<ImageReceipt, PipelineError> {
        let output = self.build().await?;
        RuntimeAssembler::from_settings(&self.settings, self.resolver())
            .assemble(&output)
            .await
    }

    pub fn files_in(&self, relative: &str) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.path(relative)) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
