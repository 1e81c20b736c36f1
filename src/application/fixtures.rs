// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 应用层测试共用的项目、包索引与配置

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::settings::Settings;
use crate::domain::services::environment_installer::PackageResolver;
use crate::infrastructure::resolvers::IndexResolver;

pub struct PipelineFixture {
    pub root: TempDir,
}

impl PipelineFixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let fixture = Self { root };

        fixture.write("source/scrapy.cfg", "[settings]\ndefault = myproject.settings\n");
        fixture.write("source/myproject/__init__.py", "");
        fixture.write("source/myproject/settings.py", "BOT_NAME = 'myproject'\n");
        fixture.write("source/myproject/spiders/__init__.py", "");
        fixture.write(
            "source/myproject/spiders/quotes.py",
            "import json\nimport scrapy\nfrom itemadapter import ItemAdapter\n",
        );

        fixture.write(
            "index/index.json",
            r#"{"packages": {
                "Scrapy": ["2.11.0", "2.11.2"],
                "itemadapter": ["0.8.0", "0.9.0"],
                "Cython": ["3.0.10"]
            }}"#,
        );
        fixture.write("index/scrapy/2.11.2/__init__.py", "__version__ = '2.11.2'\n");
        fixture.write("index/itemadapter/0.9.0/__init__.py", "");
        fixture.write("index/cython/3.0.10/__init__.py", "");
        fixture
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// 使用离线索引、镜像根目录位于临时目录下的配置
    pub fn settings(&self) -> Settings {
        let root = self.root.path().display();
        let contents = format!(
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
runtime_libraries = ["libxml2", "libxslt1.1"]

[service]
bind_address = "127.0.0.1"
config_mount = "/etc/scrapyd"
state_mount = "/var/lib/scrapyd"
"#
        );
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Settings::load(Some(file.path())).unwrap()
    }

    pub fn resolver(&self) -> Arc<dyn PackageResolver> {
        Arc::new(IndexResolver::new(self.path("index")))
    }

    pub fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
