use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::io::{self, Write};
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Структурированная запись лога в JSON формате
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// Временная метка в ISO 8601 формате
    pub timestamp: String,
    pub level: String,
    /// Целевой модуль/компонент
    pub target: String,
    pub message: String,
    /// Дополнительные поля (users, items, k, generation, ...)
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceMetrics>,
}

/// Контекст выполнения: где и какой версией записан лог
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub service: String,
    pub app_version: String,
    pub hostname: String,
    pub pid: u32,
}

impl ExecutionContext {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::for_service("recsys")
    }
}

/// Метрики производительности, извлечённые из полей события
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Длительность операции в миллисекундах
    pub duration_ms: Option<u64>,
    /// Количество обработанных элементов
    pub items_processed: Option<u64>,
}

/// JSON layer: одна строка на событие, в stderr
pub struct JsonFormatter {
    context: ExecutionContext,
}

impl JsonFormatter {
    pub fn new(context: ExecutionContext) -> Self {
        Self { context }
    }

    fn build_entry(&self, event: &Event<'_>) -> StructuredLogEntry {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let performance = visitor.extract_performance_metrics();
        StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level_name(event.metadata().level()).to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            context: Some(self.context.clone()),
            performance,
        }
    }
}

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let entry = self.build_entry(event);
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stderr(), "{}", json);
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

const TIMER_FIELDS: &str = "fields";

/// Визитор для извлечения полей из события
#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_text(field.name(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN/inf не представимы в JSON
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }
}

impl JsonVisitor {
    fn record_text(&mut self, name: &str, text: String) {
        match name {
            "message" => self.message = Some(text),
            // Поля OperationTimer приходят JSON объектом и раскладываются на верхний уровень
            TIMER_FIELDS => match serde_json::from_str::<serde_json::Map<String, Value>>(&text) {
                Ok(map) => self.fields.extend(map),
                Err(_) => {
                    self.fields.insert(name.to_string(), Value::String(text));
                }
            },
            _ => {
                self.fields.insert(name.to_string(), Value::String(text));
            }
        }
    }

    fn extract_performance_metrics(&self) -> Option<PerformanceMetrics> {
        let metrics = PerformanceMetrics {
            duration_ms: self.fields.get("duration_ms").and_then(Value::as_u64),
            items_processed: self.fields.get("items_count").and_then(Value::as_u64),
        };
        if metrics.duration_ms.is_some() || metrics.items_processed.is_some() {
            Some(metrics)
        } else {
            None
        }
    }
}

/// Конфигурация для structured logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Минимальный уровень логирования (RUST_LOG имеет приоритет)
    pub level: Level,
    /// Вывод в JSON формате
    pub json_output: bool,
    /// Цветной вывод (только для non-JSON)
    pub color_output: bool,
    pub include_line_numbers: bool,
    pub service: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            include_line_numbers: cfg!(debug_assertions),
            service: "recsys".to_string(),
        }
    }
}

impl LoggingConfig {
    /// `RECSYS_LOG_JSON=1|true` включает JSON, `RECSYS_LOG_LEVEL` задаёт уровень
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(flag) = lookup("RECSYS_LOG_JSON") {
            config.json_output = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(level) = lookup("RECSYS_LOG_LEVEL") {
            if let Ok(level) = level.trim().parse::<Level>() {
                config.level = level;
            }
        }
        if lookup("NO_COLOR").is_some() {
            config.color_output = false;
        }
        config
    }
}

/// Инициализировать structured logging. Логи идут в stderr, stdout остаётся для вывода команд.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    if config.json_output {
        // JSON формат для production
        let json_layer = JsonFormatter::new(ExecutionContext::for_service(&config.service));
        let subscriber = Registry::default().with(env_filter).with(json_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Человекочитаемый формат для разработки
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output);
        let subscriber = Registry::default().with(env_filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Вспомогательная структура для измерения времени операций
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
    fields: HashMap<String, Value>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation_name
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn fields_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }

    /// Log success; returns the measured duration.
    pub fn finish(self) -> u64 {
        let duration_ms = self.elapsed_ms();
        tracing::info!(
            operation = %self.operation_name,
            duration_ms,
            success = true,
            fields = %self.fields_json(),
            "Operation completed"
        );
        duration_ms
    }

    pub fn finish_with_error(self, error: &impl Display) -> u64 {
        let duration_ms = self.elapsed_ms();
        tracing::error!(
            operation = %self.operation_name,
            duration_ms,
            success = false,
            error = %error,
            fields = %self.fields_json(),
            "Operation failed"
        );
        duration_ms
    }

    pub fn finish_with_result<T, E: Display>(self, result: &Result<T, E>) -> u64 {
        match result {
            Ok(_) => self.finish(),
            Err(e) => self.finish_with_error(e),
        }
    }
}
