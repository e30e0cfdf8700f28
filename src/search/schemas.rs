//! JSON tool schemas served to the chat endpoint.
//!
//! These are OpenAI function-calling schemas, not MCP schemas. `strict`
//! is only requested when the provider profile opts in; some providers
//! reject it.

use serde_json::{json, Value};

/// Returns the schema list for the enabled tool names, in registry order.
#[must_use]
pub fn tool_schemas(enabled: &[&str], strict: bool) -> Vec<Value> {
    all_schemas()
        .into_iter()
        .filter(|schema| {
            schema["function"]["name"]
                .as_str()
                .is_some_and(|name| enabled.contains(&name))
        })
        .map(|mut schema| {
            if strict {
                schema["function"]["strict"] = json!(true);
            }
            schema
        })
        .collect()
}

fn all_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "view_file",
                "description": "Tool for viewing/exploring the contents of existing files.\n\nLine numbers are included in the output, indexing at 1. If the output does not include the end of the file, it will be noted after the final output line.\n\nExample (viewing the first 2 lines of a file):\n1 def my_function():\n2     print(\"Hello, World!\")\n... rest of file truncated ...",
                "parameters": {
                    "type": "object",
                    "required": ["path", "view_range"],
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Absolute path to a file, e.g. `/repo/file.py`."
                        },
                        "view_range": {
                            "type": "array",
                            "items": {"type": "integer"},
                            "default": [1, 100],
                            "description": "Range of file lines to view, 1-indexed inclusive. [11, 12] shows lines 11 and 12. `[start_line, -1]` shows all lines from start_line to the end of the file."
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "view_directory",
                "description": "Tool for viewing the contents of a directory.\n\n* Lists contents recursively, relative to the input directory\n* Directories are suffixed with a trailing slash '/'\n* Output is limited to the first 250 items\n\nExample output:\nfile1.txt\nfile2.txt\nsubdir1/\nsubdir1/file3.txt",
                "parameters": {
                    "type": "object",
                    "required": ["path", "include_hidden"],
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Absolute path to a directory, e.g. `/repo/`."
                        },
                        "include_hidden": {
                            "type": "boolean",
                            "default": false,
                            "description": "If true, include hidden files in the output (false by default)."
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "grep_search",
                "description": "Fast text-based regex search that finds exact pattern matches within files, using ripgrep. Results are formatted in ripgrep style and capped at 50 matches. Use the include or exclude patterns to filter the search scope by file type or specific paths.",
                "parameters": {
                    "type": "object",
                    "required": ["query", "case_sensitive", "exclude_pattern", "include_pattern"],
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The regex pattern to search for"
                        },
                        "case_sensitive": {
                            "type": "boolean",
                            "default": true,
                            "description": "Whether the search should be case sensitive (default: true)"
                        },
                        "exclude_pattern": {
                            "type": ["string", "null"],
                            "description": "Glob pattern for files to exclude"
                        },
                        "include_pattern": {
                            "type": ["string", "null"],
                            "description": "Glob pattern for files to include (e.g. '*.ts' for TypeScript files)"
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "glob",
                "description": "Find files in a directory tree using a glob pattern.\n\nNotes:\n- Matches are returned as paths relative to the input directory\n- Set `include_hidden=true` to match hidden files/directories (e.g. .git)\n- For directories only, end the pattern with a trailing slash (e.g. `src/`)\n- Output is capped to avoid overwhelming context\n\nExamples:\n- `**/*.py` (all Python files)\n- `src/**/*.ts` (all TS files under src)\n- `pyproject.toml` (any file named pyproject.toml)",
                "parameters": {
                    "type": "object",
                    "required": ["pattern"],
                    "properties": {
                        "pattern": {
                            "type": "string",
                            "description": "Glob pattern to match (relative; no leading '/'; no '..'). Use `**` to match across directories."
                        },
                        "path": {
                            "type": ["string", "null"],
                            "description": "Directory to search from, e.g. `/repo/src`. Defaults to the repository root."
                        },
                        "include_hidden": {
                            "type": "boolean",
                            "default": false,
                            "description": "Match hidden files and directories."
                        },
                        "max_results": {
                            "type": ["integer", "null"],
                            "description": "Result cap (default 50, maximum 200)."
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "bash",
                "description": "Run a single read-only shell command inside /repo. Pipes, redirects, command chaining, and state-changing commands are rejected. 30 second timeout.",
                "parameters": {
                    "type": "object",
                    "required": ["command"],
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The command to run, e.g. `ls /repo/src` or `git log`."
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "find_symbol",
                "description": "Resolve the symbol at a file position to its definition (LSP). Positions are 1-indexed.",
                "parameters": {
                    "type": "object",
                    "required": ["path", "line", "column"],
                    "properties": {
                        "path": {"type": "string", "description": "Absolute /repo path"},
                        "line": {"type": "integer", "description": "1-indexed line"},
                        "column": {"type": "integer", "description": "1-indexed column"}
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "search_symbol",
                "description": "Search workspace symbols by name (LSP).",
                "parameters": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string", "description": "Symbol name or prefix"},
                        "limit": {"type": ["integer", "null"], "description": "Result cap (default 20)"}
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "list_symbols",
                "description": "List the symbols defined in a file (LSP document symbols). Positions are 1-indexed.",
                "parameters": {
                    "type": "object",
                    "required": ["path"],
                    "properties": {
                        "path": {"type": "string", "description": "Absolute /repo path"}
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_type",
                "description": "Get the type/hover information for the symbol at a position (LSP). Positions are 1-indexed.",
                "parameters": {
                    "type": "object",
                    "required": ["path", "line", "column"],
                    "properties": {
                        "path": {"type": "string", "description": "Absolute /repo path"},
                        "line": {"type": "integer", "description": "1-indexed line"},
                        "column": {"type": "integer", "description": "1-indexed column"}
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "call_graph",
                "description": "Incoming/outgoing calls for the function at a position (LSP). Positions are 1-indexed.",
                "parameters": {
                    "type": "object",
                    "required": ["path", "line", "column"],
                    "properties": {
                        "path": {"type": "string", "description": "Absolute /repo path"},
                        "line": {"type": "integer", "description": "1-indexed line"},
                        "column": {"type": "integer", "description": "1-indexed column"},
                        "depth": {"type": ["integer", "null"], "description": "Traversal depth (default 1)"}
                    },
                    "additionalProperties": false
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "report_back",
                "description": "Finalize the search with your findings. Must be the ONLY tool call in its turn.",
                "parameters": {
                    "type": "object",
                    "required": ["explanation", "files"],
                    "properties": {
                        "explanation": {
                            "type": "string",
                            "description": "Concise explanation of what was found and why it answers the query."
                        },
                        "files": {
                            "type": "object",
                            "description": "Map of /repo file path to a list of 1-indexed inclusive [start, end] line ranges.",
                            "additionalProperties": {
                                "type": "array",
                                "items": {
                                    "type": "array",
                                    "items": {"type": "integer"},
                                    "minItems": 2,
                                    "maxItems": 2
                                }
                            }
                        }
                    },
                    "additionalProperties": false
                }
            }
        }),
    ]
}
