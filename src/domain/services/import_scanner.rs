// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! Python 源码导入语句扫描
//!
//! 只做行级的静态识别，动态导入（`importlib.import_module(name)`）无法检测

use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^import\s+(.+)$").unwrap());

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^from\s+([A-Za-z_][\w.]*)\s+import\b").unwrap());

static STRING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[rRbBuUfF]{0,2}["']"#).unwrap());

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());

/// Python 3 标准库顶层模块
static STDLIB: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "__future__", "_thread", "abc", "aifc", "argparse", "array", "ast", "asynchat",
        "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect",
        "builtins", "bz2", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code",
        "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
        "configparser", "contextlib", "contextvars", "copy", "copyreg", "cProfile", "crypt",
        "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib",
        "dis", "distutils", "doctest", "email", "encodings", "ensurepip", "enum", "errno",
        "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib",
        "functools", "gc", "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip",
        "hashlib", "heapq", "hmac", "html", "http", "imaplib", "imghdr", "imp", "importlib",
        "inspect", "io", "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache",
        "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes",
        "mmap", "modulefinder", "msvcrt", "multiprocessing", "netrc", "nntplib", "ntpath",
        "numbers", "operator", "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle",
        "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posix",
        "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr",
        "pydoc", "queue", "quopri", "random", "re", "readline", "reprlib", "resource",
        "rlcompleter", "runpy", "sched", "secrets", "select", "selectors", "shelve", "shlex",
        "shutil", "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver",
        "spwd", "sqlite3", "sre_compile", "sre_constants", "sre_parse", "ssl", "stat",
        "statistics", "string", "stringprep", "struct", "subprocess", "sunau", "symtable",
        "sys", "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios",
        "textwrap", "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib",
        "trace", "traceback", "tracemalloc", "tty", "turtle", "types", "typing", "unicodedata",
        "unittest", "urllib", "uu", "uuid", "venv", "warnings", "wave", "weakref",
        "webbrowser", "winreg", "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp",
        "zipfile", "zipimport", "zlib", "zoneinfo",
    ]
    .into_iter()
    .collect()
});

/// 导入名与发行包名不一致的常见依赖
static BUILTIN_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("attr", "attrs"),
        ("bs4", "beautifulsoup4"),
        ("Crypto", "pycryptodome"),
        ("cv2", "opencv-python"),
        ("dateutil", "python-dateutil"),
        ("dns", "dnspython"),
        ("docx", "python-docx"),
        ("dotenv", "python-dotenv"),
        ("fake_useragent", "fake-useragent"),
        ("git", "GitPython"),
        ("jinja2", "Jinja2"),
        ("jwt", "PyJWT"),
        ("kafka", "kafka-python"),
        ("lxml", "lxml"),
        ("magic", "python-magic"),
        ("markdown", "Markdown"),
        ("MySQLdb", "mysqlclient"),
        ("nacl", "PyNaCl"),
        ("OpenSSL", "pyOpenSSL"),
        ("PIL", "Pillow"),
        ("scrapy", "Scrapy"),
        ("scrapy_playwright", "scrapy-playwright"),
        ("scrapy_redis", "scrapy-redis"),
        ("scrapy_splash", "scrapy-splash"),
        ("serial", "pyserial"),
        ("sklearn", "scikit-learn"),
        ("slugify", "python-slugify"),
        ("socks", "PySocks"),
        ("twisted", "Twisted"),
        ("yaml", "PyYAML"),
        ("zope", "zope.interface"),
    ]
    .into_iter()
    .collect()
});

/// 判断模块是否属于标准库
pub fn is_stdlib(module: &str) -> bool {
    STDLIB.contains(module)
}

/// 内置的导入名到发行包名映射
pub fn builtin_alias(module: &str) -> Option<&'static str> {
    BUILTIN_ALIASES.get(module).copied()
}

/// 扫描源码中的绝对导入，返回顶层模块名
///
/// # 参数
///
/// * `source` - Python 源码
///
/// # 返回值
///
/// 按字典序排列的顶层模块名集合，相对导入不包含在内
pub fn scan_imports(source: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    let mut open_string: Option<&'static str> = None;

    for raw in source.lines() {
        let line = raw.trim();

        if let Some(delimiter) = open_string {
            if line.contains(delimiter) {
                open_string = None;
            }
            continue;
        }

        for statement in strip_comment(line).split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }

            // 奇数个三引号表示多行字符串从本行开始
            let opens = ["\"\"\"", "'''"]
                .into_iter()
                .find(|d| statement.matches(d).count() % 2 == 1);
            if STRING_RE.is_match(statement) {
                open_string = opens;
                break;
            }

            let statement = statement
                .strip_prefix("try:")
                .or_else(|| statement.strip_prefix("else:"))
                .map(str::trim)
                .unwrap_or(statement);

            if let Some(captures) = FROM_RE.captures(statement) {
                push_top_level(&mut modules, &captures[1]);
            } else if let Some(captures) = IMPORT_RE.captures(statement) {
                for item in captures[1].trim_matches(['(', ')']).split(',') {
                    let name = item.split_whitespace().next().unwrap_or("");
                    push_top_level(&mut modules, name);
                }
            }

            if opens.is_some() {
                open_string = opens;
                break;
            }
        }
    }
    modules
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn push_top_level(modules: &mut BTreeSet<String>, dotted: &str) {
    let top = dotted.split('.').next().unwrap_or("").trim();
    if IDENT_RE.is_match(top) {
        modules.insert(top.to_string());
    }
}
