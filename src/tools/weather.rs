//! 天气能力工具集（OpenWeather HTTP API）
//!
//! 当前天气 / 地理编码 / 空气质量 / 日出日落 / 五天摘要 / 下一个雨天 / 穿衣建议。
//! 响应用 serde_json::Value 宽松解析，格式化逻辑与 HTTP 分离以便测试。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::config::WeatherSection;
use crate::tools::{required_str, Tool, ToolRegistry};

const BASE_URL: &str = "https://api.openweathermap.org";

/// OpenWeather 客户端：持有 reqwest::Client、API Key 与单位 / 语言设置
#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    api_key: Option<String>,
    units: String,
    lang: String,
    base_url: String,
}

impl WeatherClient {
    pub fn new(cfg: &WeatherSection) -> Self {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENWEATHER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            units: cfg.units.clone(),
            lang: cfg.lang.clone(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// 测试或代理用：替换 API 根地址
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or("Weather service not configured: set OPENWEATHER_API_KEY")?;
        let mut params: Vec<(&str, String)> = query.to_vec();
        params.push(("appid", key.to_string()));
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "weather request");
        let resp = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| format!("Weather request failed: {}", e))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Weather response unreadable: {}", e))?;
        if !status.is_success() {
            let reason = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(format!("Weather service error ({}): {}", status.as_u16(), reason));
        }
        Ok(body)
    }

    fn localized(&self, location: &str) -> Vec<(&'static str, String)> {
        vec![
            ("q", location.to_string()),
            ("units", self.units.clone()),
            ("lang", self.lang.clone()),
        ]
    }

    pub async fn current(&self, location: &str) -> Result<Value, String> {
        self.get("/data/2.5/weather", &self.localized(location)).await
    }

    pub async fn forecast(&self, location: &str) -> Result<Value, String> {
        self.get("/data/2.5/forecast", &self.localized(location)).await
    }

    pub async fn geocode(&self, location: &str) -> Result<(f64, f64), String> {
        let arr = self
            .get(
                "/geo/1.0/direct",
                &[("q", location.to_string()), ("limit", "1".to_string())],
            )
            .await?;
        let first = arr
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| format!("Could not geolocate {}", location))?;
        match (first["lat"].as_f64(), first["lon"].as_f64()) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(format!("Could not geolocate {}", location)),
        }
    }

    pub async fn air_pollution(&self, lat: f64, lon: f64) -> Result<Value, String> {
        self.get(
            "/data/2.5/air_pollution",
            &[("lat", lat.to_string()), ("lon", lon.to_string())],
        )
        .await
    }
}

fn temp_unit(units: &str) -> &'static str {
    match units {
        "imperial" => "°F",
        "standard" => "K",
        _ => "°C",
    }
}

/// 当前天气一句话
pub fn describe_current(location: &str, data: &Value, units: &str) -> Result<String, String> {
    let desc = data["weather"][0]["description"].as_str().unwrap_or("no description");
    let temp = data["main"]["temp"]
        .as_f64()
        .ok_or("Weather response missing temperature")?;
    let humidity = data["main"]["humidity"].as_f64().unwrap_or(0.0);
    Ok(format!(
        "In {}: {}, {:.1}{}, humidity {:.0}%.",
        location,
        desc,
        temp,
        temp_unit(units),
        humidity
    ))
}

/// 按温度带与是否下雨给出穿衣建议（摄氏度）
pub fn clothing_advice(temp_c: f64, raining: bool) -> String {
    let mut advice = vec![if temp_c < 10.0 {
        "wear a warm coat and scarf"
    } else if temp_c < 20.0 {
        "take a jacket or sweater"
    } else {
        "light clothes are fine"
    }];
    if raining {
        advice.push("don't forget an umbrella");
    }
    format!("Recommendation: {}.", advice.join(" and "))
}

/// 把 3 小时粒度的预报聚合为每天的最低 / 最高温
pub fn daily_ranges(forecast: &Value) -> BTreeMap<NaiveDate, (f64, f64)> {
    let mut days: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
    for entry in forecast["list"].as_array().into_iter().flatten() {
        let (Some(day), Some(t)) = (entry_date(entry), entry["main"]["temp"].as_f64()) else {
            continue;
        };
        let range = days.entry(day).or_insert((f64::INFINITY, f64::NEG_INFINITY));
        range.0 = range.0.min(t);
        range.1 = range.1.max(t);
    }
    days
}

/// 预报中第一个出现降雨的日期
pub fn first_rain_day(forecast: &Value) -> Option<NaiveDate> {
    forecast["list"]
        .as_array()?
        .iter()
        .find(|e| {
            e["weather"][0]["main"]
                .as_str()
                .map(|m| m.to_lowercase().contains("rain"))
                .unwrap_or(false)
        })
        .and_then(entry_date)
}

fn entry_date(entry: &Value) -> Option<NaiveDate> {
    let txt = entry["dt_txt"].as_str()?;
    NaiveDate::parse_from_str(txt.split_whitespace().next()?, "%Y-%m-%d").ok()
}

pub fn aqi_label(aqi: u64) -> &'static str {
    match aqi {
        1 => "Good",
        2 => "Fair",
        3 => "Moderate",
        4 => "Poor",
        5 => "Very poor",
        _ => "Unknown",
    }
}

/// 日出日落：API 给 UTC 时间戳 + 时区偏移（秒），换算为当地时间
pub fn sun_times(data: &Value) -> Option<(String, String)> {
    let offset = data["timezone"].as_i64().unwrap_or(0);
    let fmt = |ts: i64| {
        DateTime::from_timestamp(ts + offset, 0).map(|t| t.format("%H:%M").to_string())
    };
    let sunrise = fmt(data["sys"]["sunrise"].as_i64()?)?;
    let sunset = fmt(data["sys"]["sunset"].as_i64()?)?;
    Some((sunrise, sunset))
}

fn location_arg(args: &Value) -> Result<&str, String> {
    required_str(args, "location")
}

pub struct GetWeatherTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Current weather (description, temperature, humidity). Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        tracing::info!(location = %location, "get_weather tool execute");
        let data = self.client.current(location).await?;
        describe_current(location, &data, &self.client.units)
    }
}

pub struct GeocodeTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &str {
        "geocode"
    }

    fn description(&self) -> &str {
        "Latitude and longitude of a place. Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let (lat, lon) = self.client.geocode(location).await?;
        Ok(format!("{}: lat {:.4}, lon {:.4}", location, lat, lon))
    }
}

pub struct AirQualityTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for AirQualityTool {
    fn name(&self) -> &str {
        "get_air_quality"
    }

    fn description(&self) -> &str {
        "Current air quality index. Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let (lat, lon) = self.client.geocode(location).await?;
        let data = self.client.air_pollution(lat, lon).await?;
        let aqi = data["list"][0]["main"]["aqi"]
            .as_u64()
            .ok_or("Air quality response missing AQI")?;
        Ok(format!(
            "Air quality in {}: {} (AQI={}).",
            location,
            aqi_label(aqi),
            aqi
        ))
    }
}

pub struct SunTimesTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for SunTimesTool {
    fn name(&self) -> &str {
        "get_sun_times"
    }

    fn description(&self) -> &str {
        "Today's sunrise and sunset (local time). Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let data = self.client.current(location).await?;
        let (rise, set) = sun_times(&data).ok_or("Weather response missing sun times")?;
        Ok(format!(
            "In {} the sun rises at {} and sets at {} (local time).",
            location, rise, set
        ))
    }
}

pub struct WeeklySummaryTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for WeeklySummaryTool {
    fn name(&self) -> &str {
        "get_weekly_summary"
    }

    fn description(&self) -> &str {
        "Daily min/max temperatures for the next 5 days. Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let data = self.client.forecast(location).await?;
        let unit = temp_unit(&self.client.units);
        let lines: Vec<String> = daily_ranges(&data)
            .into_iter()
            .map(|(day, (lo, hi))| format!("{}: {:.1}-{:.1}{}", day.format("%d/%m"), lo, hi, unit))
            .collect();
        if lines.is_empty() {
            return Err(format!("No forecast available for {}", location));
        }
        Ok(format!("5-day summary for {}: {}", location, lines.join("; ")))
    }
}

pub struct NextRainDayTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for NextRainDayTool {
    fn name(&self) -> &str {
        "get_next_rain_day"
    }

    fn description(&self) -> &str {
        "First day with rain in the next 5 days. Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let data = self.client.forecast(location).await?;
        Ok(match first_rain_day(&data) {
            Some(day) => format!(
                "The next rainy day in {} is {}.",
                location,
                day.format("%d/%m/%Y")
            ),
            None => format!("No rain expected in {} in the next 5 days.", location),
        })
    }
}

pub struct ClothingAdviceTool {
    client: Arc<WeatherClient>,
}

#[async_trait]
impl Tool for ClothingAdviceTool {
    fn name(&self) -> &str {
        "get_clothing_advice"
    }

    fn description(&self) -> &str {
        "What to wear given the current weather. Args: {\"location\": \"city\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = location_arg(&args)?;
        let data = self.client.current(location).await?;
        let mut temp = data["main"]["temp"]
            .as_f64()
            .ok_or("Weather response missing temperature")?;
        if self.client.units == "imperial" {
            temp = (temp - 32.0) * 5.0 / 9.0;
        } else if self.client.units == "standard" {
            temp -= 273.15;
        }
        let raining = data["weather"][0]["main"]
            .as_str()
            .map(|m| m.to_lowercase().contains("rain"))
            .unwrap_or(false);
        Ok(clothing_advice(temp, raining))
    }
}

/// 天气能力的完整工具集
pub fn weather_tools(cfg: &WeatherSection) -> ToolRegistry {
    let client = Arc::new(WeatherClient::new(cfg));
    if client.api_key.is_none() {
        tracing::warn!("OPENWEATHER_API_KEY not set; weather tools will report an error");
    }
    let mut registry = ToolRegistry::new();
    registry.register(GetWeatherTool { client: client.clone() });
    registry.register(GeocodeTool { client: client.clone() });
    registry.register(AirQualityTool { client: client.clone() });
    registry.register(SunTimesTool { client: client.clone() });
    registry.register(WeeklySummaryTool { client: client.clone() });
    registry.register(NextRainDayTool { client: client.clone() });
    registry.register(ClothingAdviceTool { client });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forecast() -> Value {
        json!({
            "list": [
                {"dt_txt": "2025-03-10 09:00:00", "main": {"temp": 12.0}, "weather": [{"main": "Clouds"}]},
                {"dt_txt": "2025-03-10 15:00:00", "main": {"temp": 18.5}, "weather": [{"main": "Clear"}]},
                {"dt_txt": "2025-03-11 09:00:00", "main": {"temp": 9.0}, "weather": [{"main": "Rain"}]},
                {"dt_txt": "2025-03-11 15:00:00", "main": {"temp": 11.0}, "weather": [{"main": "Rain"}]}
            ]
        })
    }

    #[test]
    fn test_clothing_bands() {
        assert!(clothing_advice(5.0, false).contains("coat"));
        assert!(clothing_advice(15.0, false).contains("jacket"));
        assert!(clothing_advice(25.0, false).contains("light clothes"));
        assert!(clothing_advice(25.0, true).contains("umbrella"));
    }

    #[test]
    fn test_daily_ranges_and_rain() {
        let f = forecast();
        let ranges = daily_ranges(&f);
        let d10 = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(ranges[&d10], (12.0, 18.5));
        assert_eq!(first_rain_day(&f), NaiveDate::from_ymd_opt(2025, 3, 11));
    }

    #[test]
    fn test_describe_current() {
        let data = json!({"weather": [{"description": "cielo claro"}], "main": {"temp": 22.04, "humidity": 40}});
        let text = describe_current("Madrid", &data, "metric").unwrap();
        assert_eq!(text, "In Madrid: cielo claro, 22.0°C, humidity 40%.");
    }

    #[test]
    fn test_sun_times_apply_offset() {
        let data = json!({"timezone": 3600, "sys": {"sunrise": 1_700_000_000, "sunset": 1_700_036_000}});
        let (rise, set) = sun_times(&data).unwrap();
        assert_eq!(rise.len(), 5);
        assert_ne!(rise, set);
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let cfg = WeatherSection {
            api_key: Some(String::new()),
            ..WeatherSection::default()
        };
        let mut client = WeatherClient::new(&cfg);
        client.api_key = None;
        let err = client.current("Madrid").await.unwrap_err();
        assert!(err.contains("OPENWEATHER_API_KEY"));
    }
}
